//! Reader-facing loan entries.

use super::fines::{self, LoanState};
use crate::db::{Issue, timestamp_to_datetime};
use crate::error::Result;
use crate::library::book::Book;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Title shown when a loan's book is gone from the catalog.
pub const PLACEHOLDER_TITLE: &str = "Unknown Title";

/// One entry of `issuedBooks[]`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedBookView {
    /// Catalog ID.
    pub book_id: i64,
    /// Book title, or the placeholder.
    pub title: String,
    /// Cover image, empty if unknown.
    pub image: String,
    /// Loan start.
    pub issue_date: DateTime<Utc>,
    /// Loan end.
    pub due_date: DateTime<Utc>,
    /// Read-time state.
    pub status: LoanState,
    /// Whole days before the due date, 0 once overdue.
    pub days_left: i64,
    /// Fine posted so far.
    pub fine: i64,
    /// Fine already taken from the wallet.
    pub total_fine_paid: i64,
}

/// Build views for `issues`, looking each book up with `lookup`.
///
/// Never fails: a missing book or a failed lookup degrades to placeholder
/// display data.
pub fn enrich<F>(issues: &[Issue], now: i64, lookup: F) -> Vec<IssuedBookView>
where
    F: Fn(i64) -> Result<Option<Book>>,
{
    issues
        .iter()
        .map(|issue| {
            let book = match lookup(issue.book_id) {
                Ok(book) => book,
                Err(e) => {
                    tracing::warn!(book_id = issue.book_id, error = %e, "Book lookup failed");
                    None
                }
            };
            let (status, days_left) = fines::loan_state(issue.due_date, now);

            IssuedBookView {
                book_id: issue.book_id,
                title: book
                    .as_ref()
                    .map(|b| b.title.clone())
                    .unwrap_or_else(|| PLACEHOLDER_TITLE.to_string()),
                image: book.and_then(|b| b.image).unwrap_or_default(),
                issue_date: timestamp_to_datetime(issue.issue_date),
                due_date: timestamp_to_datetime(issue.due_date),
                status,
                days_left,
                fine: issue.fine,
                // Fines are debited as they are posted.
                total_fine_paid: issue.fine,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::IssueStatus;
    use crate::error::AppError;

    fn issue(book_id: i64) -> Issue {
        Issue {
            id: book_id,
            user_id: "user-1".to_string(),
            book_id,
            issue_date: 0,
            due_date: fines::due_date(0, 7),
            status: IssueStatus::Issued,
            fine: 0,
            last_fine_check: fines::due_date(0, 7),
            return_date: None,
        }
    }

    #[test]
    fn test_missing_book_gets_placeholder() {
        let views = enrich(&[issue(1), issue(2)], 0, |id| {
            if id == 1 {
                Ok(Some(Book::new(1, "Dune", "Frank Herbert")))
            } else {
                Ok(None)
            }
        });

        assert_eq!(views[0].title, "Dune");
        assert_eq!(views[1].title, PLACEHOLDER_TITLE);
        assert_eq!(views[1].image, "");
    }

    #[test]
    fn test_lookup_error_does_not_fail() {
        let views = enrich(&[issue(7)], 0, |_| {
            Err(AppError::Internal("lookup exploded".to_string()))
        });
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].title, PLACEHOLDER_TITLE);
        assert_eq!(views[0].days_left, 7);
    }

    #[test]
    fn test_serializes_camel_case() {
        let views = enrich(&[issue(3)], 8 * fines::SECONDS_PER_DAY, |_| Ok(None));
        let json = serde_json::to_value(&views[0]).unwrap();
        assert_eq!(json["bookId"], 3);
        assert_eq!(json["status"], "Overdue");
        assert_eq!(json["daysLeft"], 0);
        assert!(json.get("totalFinePaid").is_some());
    }
}
