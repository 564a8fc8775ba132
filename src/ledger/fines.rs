//! Fine and due-date arithmetic on Unix timestamps.

use crate::db::Issue;
use serde::{Deserialize, Serialize};

/// Length of one fine period.
pub const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// Due date of a loan opened at `issue_date`.
pub fn due_date(issue_date: i64, loan_days: i64) -> i64 {
    issue_date + loan_days * SECONDS_PER_DAY
}

/// Fine owed for whole days elapsed since the last charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FineAccrual {
    /// Whole overdue days since the high-water mark.
    pub days: i64,
    /// Coins to charge.
    pub amount: i64,
}

/// Compute the fine an open loan owes at `now`.
///
/// Days are counted from `max(last_fine_check, due_date)` and truncated, so
/// calls within the same day window return `None`. Returned loans never
/// accrue.
pub fn accrue(issue: &Issue, now: i64, fine_per_day: i64) -> Option<FineAccrual> {
    if !issue.status.is_active() {
        return None;
    }

    let floor = issue.last_fine_check.max(issue.due_date);
    if now <= floor {
        return None;
    }

    let days = (now - floor) / SECONDS_PER_DAY;
    if days == 0 {
        return None;
    }

    Some(FineAccrual {
        days,
        amount: days * fine_per_day,
    })
}

/// Loan state as shown to the reader. Computed, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanState {
    /// Before the due date.
    Active,
    /// Past the due date.
    Overdue,
}

/// Read-time state and whole days left before `due_date`.
pub fn loan_state(due_date: i64, now: i64) -> (LoanState, i64) {
    let diff = now - due_date;
    if diff > 0 {
        (LoanState::Overdue, 0)
    } else {
        (LoanState::Active, -diff / SECONDS_PER_DAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::IssueStatus;

    const T: i64 = 1_700_000_000;
    const HOUR: i64 = 60 * 60;

    fn open_issue() -> Issue {
        let due = due_date(T, 7);
        Issue {
            id: 1,
            user_id: "user-1".to_string(),
            book_id: 42,
            issue_date: T,
            due_date: due,
            status: IssueStatus::Issued,
            fine: 0,
            last_fine_check: due,
            return_date: None,
        }
    }

    #[test]
    fn test_due_date_is_seven_days_out() {
        assert_eq!(due_date(T, 7), T + 7 * SECONDS_PER_DAY);
    }

    #[test]
    fn test_no_fine_before_first_full_day() {
        let issue = open_issue();
        assert_eq!(accrue(&issue, T, 20), None);
        assert_eq!(accrue(&issue, issue.due_date, 20), None);
        assert_eq!(accrue(&issue, issue.due_date + 23 * HOUR, 20), None);
    }

    #[test]
    fn test_whole_days_are_charged() {
        let issue = open_issue();
        let at_25h = accrue(&issue, issue.due_date + 25 * HOUR, 20).unwrap();
        assert_eq!(at_25h, FineAccrual { days: 1, amount: 20 });

        let at_49h = accrue(&issue, issue.due_date + 49 * HOUR, 20).unwrap();
        assert_eq!(at_49h, FineAccrual { days: 2, amount: 40 });
    }

    #[test]
    fn test_high_water_mark_is_respected() {
        let mut issue = open_issue();
        issue.last_fine_check = issue.due_date + 25 * HOUR;
        issue.fine = 20;

        // Same day window as the last charge.
        assert_eq!(accrue(&issue, issue.due_date + 30 * HOUR, 20), None);
        assert_eq!(
            accrue(&issue, issue.due_date + 49 * HOUR, 20).map(|a| a.days),
            Some(1)
        );
    }

    #[test]
    fn test_stale_mark_below_due_date_uses_due_date() {
        let mut issue = open_issue();
        issue.last_fine_check = T;
        assert_eq!(accrue(&issue, issue.due_date + 2 * HOUR, 20), None);
    }

    #[test]
    fn test_returned_issue_never_accrues() {
        let mut issue = open_issue();
        issue.status = IssueStatus::Returned;
        assert_eq!(accrue(&issue, issue.due_date + 100 * SECONDS_PER_DAY, 20), None);
    }

    #[test]
    fn test_loan_state() {
        let due = due_date(T, 7);
        assert_eq!(loan_state(due, T), (LoanState::Active, 7));
        assert_eq!(loan_state(due, T + HOUR), (LoanState::Active, 6));
        assert_eq!(loan_state(due, due), (LoanState::Active, 0));
        assert_eq!(loan_state(due, due + 1), (LoanState::Overdue, 0));
    }
}
