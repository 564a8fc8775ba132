mod schema;
mod tx;

pub use schema::Database;
pub use tx::LedgerTx;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User account with its embedded coin wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user ID.
    pub id: String,
    /// Username for login.
    pub username: String,
    /// Email address.
    pub email: String,
    /// Argon2 password hash.
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// User role: "admin" or "user".
    pub role: String,
    /// Blocked users cannot log in.
    pub is_blocked: bool,
    /// Wallet balance, never negative once persisted.
    pub coins: i64,
    /// Account creation timestamp.
    pub created_at: i64,
    /// Last login timestamp.
    pub last_login: Option<i64>,
}

/// Authentication session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Session token.
    pub token: String,
    /// User ID.
    pub user_id: String,
    /// Expiration timestamp.
    pub expires_at: i64,
}

/// Lifecycle state of a loan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueStatus {
    /// On loan, not yet fined.
    Issued,
    /// On loan, at least one fine posted.
    Overdue,
    /// Closed; fine is frozen.
    Returned,
}

impl IssueStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::Issued => "issued",
            IssueStatus::Overdue => "overdue",
            IssueStatus::Returned => "returned",
        }
    }

    /// Parse the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "issued" => Some(IssueStatus::Issued),
            "overdue" => Some(IssueStatus::Overdue),
            "returned" => Some(IssueStatus::Returned),
            _ => None,
        }
    }

    /// Whether the loan is still open.
    pub fn is_active(&self) -> bool {
        !matches!(self, IssueStatus::Returned)
    }
}

/// One loan of one book to one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    /// Issue ID.
    pub id: i64,
    /// Borrowing user.
    pub user_id: String,
    /// Borrowed book.
    pub book_id: i64,
    /// Loan start.
    pub issue_date: i64,
    /// Loan end; fines accrue after it.
    pub due_date: i64,
    /// Lifecycle state.
    pub status: IssueStatus,
    /// Cumulative fine posted against this loan.
    pub fine: i64,
    /// Instant up to which fines have been charged.
    pub last_fine_check: i64,
    /// Return timestamp.
    pub return_date: Option<i64>,
}

/// Kind of wallet movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryKind {
    /// Coins bought.
    Purchase,
    /// Issuance fee.
    Issue,
    /// Overdue fine.
    Fine,
}

impl EntryKind {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Purchase => "PURCHASE",
            EntryKind::Issue => "ISSUE",
            EntryKind::Fine => "FINE",
        }
    }

    /// Parse the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PURCHASE" => Some(EntryKind::Purchase),
            "ISSUE" => Some(EntryKind::Issue),
            "FINE" => Some(EntryKind::Fine),
            _ => None,
        }
    }
}

/// Append-only wallet ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    /// Entry ID.
    pub id: i64,
    /// Wallet owner.
    pub user_id: String,
    /// Username at the time of the entry.
    pub username: String,
    /// Signed wallet delta.
    pub amount: i64,
    /// Kind of movement.
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Human-readable description.
    pub description: String,
    /// Creation timestamp.
    pub created_at: i64,
}

/// Kind of reader annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HighlightKind {
    /// Highlighted passage.
    Highlight,
    /// Page bookmark.
    Bookmark,
    /// Free-form note.
    Note,
}

impl HighlightKind {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            HighlightKind::Highlight => "highlight",
            HighlightKind::Bookmark => "bookmark",
            HighlightKind::Note => "note",
        }
    }

    /// Parse the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "highlight" => Some(HighlightKind::Highlight),
            "bookmark" => Some(HighlightKind::Bookmark),
            "note" => Some(HighlightKind::Note),
            _ => None,
        }
    }
}

/// Highlight, bookmark or note in a book.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Highlight {
    /// Highlight ID.
    pub id: String,
    /// User ID.
    pub user_id: String,
    /// Book ID.
    pub book_id: i64,
    /// Page number.
    pub page: i64,
    /// Highlighted text.
    pub text: String,
    /// User note/annotation.
    pub note: String,
    /// Highlight color.
    pub color: String,
    /// Annotation kind.
    #[serde(rename = "type")]
    pub kind: HighlightKind,
    /// Selection coordinates (opaque JSON).
    pub position: serde_json::Value,
    /// Creation timestamp.
    pub created_at: i64,
}

/// Reading progress for a book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingProgress {
    /// User ID.
    pub user_id: String,
    /// Book ID.
    pub book_id: i64,
    /// Current page number.
    pub current_page: i64,
    /// Total pages in book.
    pub total_pages: i64,
    /// Accumulated reading time in seconds.
    pub time_spent: i64,
    /// Last read timestamp.
    pub last_read: i64,
}

/// Book review, one per user and book.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    /// Review ID.
    pub id: String,
    /// Book ID.
    pub book_id: i64,
    /// Author of the review.
    pub user_id: String,
    /// Username at the time of review.
    pub username: String,
    /// Rating 1-5.
    pub rating: i64,
    /// Review text.
    pub comment: Option<String>,
    /// Last update timestamp.
    pub date: i64,
}

/// User-facing notice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Notification ID.
    pub id: i64,
    /// Recipient.
    pub user_id: String,
    /// Message text.
    pub message: String,
    /// Severity: "info" or "warning".
    #[serde(rename = "type")]
    pub kind: String,
    /// Whether the user has seen it.
    pub read: bool,
    /// Creation timestamp.
    pub created_at: i64,
}

/// Timestamp helper.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Convert timestamp to DateTime.
pub fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now)
}
