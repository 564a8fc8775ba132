//! Ledger operations scoped to one SQLite transaction.

use super::schema::{BOOK_COLUMNS, ISSUE_COLUMNS, USER_COLUMNS, row_to_book, row_to_issue, row_to_user};
use crate::db::{EntryKind, Issue, IssueStatus, User};
use crate::error::{AppError, Result};
use crate::library::book::Book;
use rusqlite::{Connection, OptionalExtension, params};

/// Borrowed view of an open transaction, handed out by
/// [`Database::transaction`](super::Database::transaction).
pub struct LedgerTx<'a> {
    conn: &'a Connection,
}

impl<'a> LedgerTx<'a> {
    pub(super) fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Get user by ID.
    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                row_to_user,
            )
            .optional()
            .map_err(|e| AppError::Internal(format!("Failed to get user: {}", e)))
    }

    /// Get book by ID.
    pub fn get_book(&self, id: i64) -> Result<Option<Book>> {
        self.conn
            .query_row(
                &format!("SELECT {BOOK_COLUMNS} FROM books WHERE id = ?1"),
                params![id],
                row_to_book,
            )
            .optional()
            .map_err(|e| AppError::Internal(format!("Failed to get book: {}", e)))
    }

    /// Issued or overdue loans of a user, oldest first.
    pub fn active_issues(&self, user_id: &str) -> Result<Vec<Issue>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {ISSUE_COLUMNS} FROM issues
                 WHERE user_id = ?1 AND status IN ('issued', 'overdue')
                 ORDER BY issue_date, id"
            ))
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let issues = stmt
            .query_map(params![user_id], row_to_issue)
            .map_err(|e| AppError::Internal(format!("Failed to get issues: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect issues: {}", e)))?;

        Ok(issues)
    }

    /// The open loan of a book to a user, if any.
    pub fn find_active_issue(&self, user_id: &str, book_id: i64) -> Result<Option<Issue>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {ISSUE_COLUMNS} FROM issues
                     WHERE user_id = ?1 AND book_id = ?2 AND status IN ('issued', 'overdue')"
                ),
                params![user_id, book_id],
                row_to_issue,
            )
            .optional()
            .map_err(|e| AppError::Internal(format!("Failed to get issue: {}", e)))
    }

    /// Open a loan. The partial unique index rejects a second open loan
    /// for the same pair.
    pub fn insert_issue(
        &self,
        user_id: &str,
        book_id: i64,
        issue_date: i64,
        due_date: i64,
    ) -> Result<Issue> {
        self.conn
            .query_row(
                &format!(
                    "INSERT INTO issues
                     (user_id, book_id, issue_date, due_date, status, fine, last_fine_check)
                     VALUES (?1, ?2, ?3, ?4, 'issued', 0, ?4)
                     RETURNING {ISSUE_COLUMNS}"
                ),
                params![user_id, book_id, issue_date, due_date],
                row_to_issue,
            )
            .map_err(|e| {
                if e.to_string().contains("UNIQUE constraint") {
                    AppError::DuplicateIssue
                } else {
                    AppError::Internal(format!("Failed to create issue: {}", e))
                }
            })
    }

    /// Add `delta` to an open loan's fine and move its high-water mark to `now`.
    ///
    /// Compare-and-swap on `last_fine_check`: returns false and changes
    /// nothing if the mark moved or the loan closed since it was read.
    pub fn post_fine(&self, issue: &Issue, delta: i64, now: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE issues SET fine = fine + ?1, last_fine_check = ?2, status = 'overdue'
                 WHERE id = ?3 AND last_fine_check = ?4 AND status IN ('issued', 'overdue')",
                params![delta, now, issue.id, issue.last_fine_check],
            )
            .map_err(|e| AppError::Internal(format!("Failed to post fine: {}", e)))?;
        Ok(rows == 1)
    }

    /// Close an open loan. Returns false if it was already returned.
    pub fn close_issue(&self, issue_id: i64, now: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE issues SET status = ?1, return_date = ?2
                 WHERE id = ?3 AND status IN ('issued', 'overdue')",
                params![IssueStatus::Returned.as_str(), now, issue_id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to close issue: {}", e)))?;
        Ok(rows == 1)
    }

    /// Take the physical copy off the shelf. False if it is already out.
    pub fn lock_copy(&self, book_id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE books SET available = 0
                 WHERE id = ?1 AND book_type = 'PHYSICAL' AND available = 1",
                params![book_id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to lock copy: {}", e)))?;
        Ok(rows == 1)
    }

    /// Put a physical copy back on the shelf. No-op for e-books and missing books.
    pub fn release_copy(&self, book_id: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE books SET available = 1 WHERE id = ?1 AND book_type = 'PHYSICAL'",
                params![book_id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to release copy: {}", e)))?;
        Ok(())
    }

    /// Persist a wallet balance.
    pub fn set_coins(&self, user_id: &str, coins: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE users SET coins = ?1 WHERE id = ?2",
                params![coins, user_id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to update wallet: {}", e)))?;
        Ok(())
    }

    /// Debit the wallet only if it covers `amount`. Returns the new balance.
    pub fn debit_coins(&self, user_id: &str, amount: i64) -> Result<Option<i64>> {
        self.conn
            .query_row(
                "UPDATE users SET coins = coins - ?1 WHERE id = ?2 AND coins >= ?1
                 RETURNING coins",
                params![amount, user_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| AppError::Internal(format!("Failed to debit wallet: {}", e)))
    }

    /// Credit the wallet. Returns the new balance.
    pub fn credit_coins(&self, user_id: &str, amount: i64) -> Result<i64> {
        self.conn
            .query_row(
                "UPDATE users SET coins = coins + ?1 WHERE id = ?2 RETURNING coins",
                params![amount, user_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| AppError::Internal(format!("Failed to credit wallet: {}", e)))?
            .ok_or(AppError::UserNotFound)
    }

    /// Append a ledger entry.
    pub fn append_entry(
        &self,
        user: &User,
        amount: i64,
        kind: EntryKind,
        description: &str,
        now: i64,
    ) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO ledger_entries (user_id, username, amount, kind, description, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    user.id,
                    user.username,
                    amount,
                    kind.as_str(),
                    description,
                    now
                ],
            )
            .map_err(|e| AppError::Internal(format!("Failed to append ledger entry: {}", e)))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Queue a notification for a user.
    pub fn notify(&self, user_id: &str, message: &str, kind: &str, now: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO notifications (user_id, message, kind, read, created_at)
                 VALUES (?1, ?2, ?3, 0, ?4)",
                params![user_id, message, kind, now],
            )
            .map_err(|e| AppError::Internal(format!("Failed to create notification: {}", e)))?;
        Ok(())
    }
}
