//! Lending ledger: issuance, returns, fine reconciliation and the wallet.
//!
//! Every mutating operation runs inside one [`Database::transaction`], so
//! wallet balance, loan records, ledger entries and physical availability
//! change together or not at all.

pub mod fines;
pub mod view;

use crate::config::LedgerConfig;
use crate::db::{Database, EntryKind, Issue, LedgerEntry, LedgerTx, User};
use crate::error::{AppError, Result};
use mockable::Clock;
use std::sync::Arc;
use view::{IssuedBookView, PLACEHOLDER_TITLE};

/// Message shown when reconciliation empties the wallet.
pub const ZERO_BALANCE_MESSAGE: &str = "Balance hit 0! All books returned.";

/// Effect of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Wallet balance after the pass.
    pub coins: i64,
    /// Sum of fines posted in this pass.
    pub total_deducted: i64,
    /// Whether the zero-balance protocol closed every active loan.
    pub auto_returned: bool,
    /// Books closed by the zero-balance protocol.
    pub returned_books: Vec<i64>,
}

/// Result of a successful issuance.
#[derive(Debug, Clone)]
pub struct IssueOutcome {
    /// The new loan.
    pub issue: Issue,
    /// Title used for the ledger entry.
    pub title: String,
    /// Wallet balance after the fee.
    pub coins: i64,
    /// Every active loan, the new one included.
    pub issued_books: Vec<IssuedBookView>,
}

/// Result of a return or a sync.
#[derive(Debug, Clone)]
pub struct LedgerSnapshot {
    /// Wallet balance.
    pub coins: i64,
    /// Remaining active loans.
    pub issued_books: Vec<IssuedBookView>,
    /// Whether the zero-balance protocol fired.
    pub auto_returned: bool,
    /// Fines posted by this call.
    pub total_deducted: i64,
}

/// Read-only ledger state for the dashboard.
#[derive(Debug, Clone)]
pub struct LedgerSummary {
    /// Wallet balance.
    pub coins: i64,
    /// Active loans with read-time status.
    pub issued_books: Vec<IssuedBookView>,
    /// Fines ever posted against the user, returned loans included.
    pub total_fines: i64,
}

/// Outcome of reconciling many users.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// Users reconciled successfully.
    pub reconciled: usize,
    /// Users whose reconciliation failed.
    pub failed: usize,
    /// Fines posted across all users.
    pub total_deducted: i64,
    /// Users whose wallet hit zero.
    pub auto_returned: usize,
}

/// Lending ledger service.
#[derive(Clone)]
pub struct Ledger {
    db: Database,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
}

impl Ledger {
    /// Create a ledger over `db`, reading time from `clock`.
    pub fn new(db: Database, clock: Arc<dyn Clock>, config: LedgerConfig) -> Self {
        Self { db, clock, config }
    }

    fn now(&self) -> i64 {
        self.clock.utc().timestamp()
    }

    /// Lend `book_id` to `user_id`, debiting the issuance fee.
    ///
    /// Pending fines are reconciled and committed first, so a rejected
    /// issuance still leaves the wallet up to date.
    pub fn issue(&self, user_id: &str, book_id: i64, title: Option<&str>) -> Result<IssueOutcome> {
        let now = self.now();
        self.reconcile_user(user_id, now)?;

        let outcome = self.db.transaction(|tx| {
            let user = tx.get_user(user_id)?.ok_or(AppError::UserNotFound)?;
            let rec = self.reconcile_in(tx, &user, now)?;

            if tx.find_active_issue(user_id, book_id)?.is_some() {
                return Err(AppError::DuplicateIssue);
            }
            if rec.coins < self.config.issue_cost {
                return Err(AppError::InsufficientBalance);
            }

            let book = tx.get_book(book_id)?.ok_or(AppError::BookNotFound)?;
            if book.book_type.is_capped() && !tx.lock_copy(book_id)? {
                return Err(AppError::Unavailable);
            }

            let due = fines::due_date(now, self.config.loan_days);
            let issue = tx.insert_issue(user_id, book_id, now, due)?;
            let coins = tx
                .debit_coins(user_id, self.config.issue_cost)?
                .ok_or(AppError::InsufficientBalance)?;

            let title = title
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .unwrap_or(&book.title)
                .to_string();
            tx.append_entry(
                &user,
                -self.config.issue_cost,
                EntryKind::Issue,
                &format!("Issued: {}", title),
                now,
            )?;

            Ok(IssueOutcome {
                issue,
                title,
                coins,
                issued_books: self.active_views(tx, user_id, now)?,
            })
        })?;

        tracing::info!(
            user_id = %user_id,
            book_id,
            coins = outcome.coins,
            "Book issued"
        );
        Ok(outcome)
    }

    /// Close the user's active loan of `book_id`.
    ///
    /// Fines are reconciled first. If that empties the wallet the loan is
    /// closed by the zero-balance protocol and the return still succeeds.
    pub fn return_book(&self, user_id: &str, book_id: i64) -> Result<LedgerSnapshot> {
        let now = self.now();
        let pre = self.reconcile_user(user_id, now)?;

        let snapshot = self.db.transaction(|tx| {
            let user = tx.get_user(user_id)?.ok_or(AppError::UserNotFound)?;
            let rec = self.reconcile_in(tx, &user, now)?;

            match tx.find_active_issue(user_id, book_id)? {
                Some(issue) => {
                    if tx.close_issue(issue.id, now)? {
                        tx.release_copy(book_id)?;
                    }
                }
                None if pre.returned_books.contains(&book_id)
                    || rec.returned_books.contains(&book_id) => {}
                None => return Err(AppError::NoActiveIssue),
            }

            Ok(LedgerSnapshot {
                coins: rec.coins,
                issued_books: self.active_views(tx, user_id, now)?,
                auto_returned: pre.auto_returned || rec.auto_returned,
                total_deducted: pre.total_deducted + rec.total_deducted,
            })
        })?;

        tracing::info!(user_id = %user_id, book_id, "Book returned");
        Ok(snapshot)
    }

    /// Post pending fines for a user and return the resulting state.
    pub fn sync_fines(&self, user_id: &str) -> Result<LedgerSnapshot> {
        let now = self.now();
        self.db.transaction(|tx| {
            let user = tx.get_user(user_id)?.ok_or(AppError::UserNotFound)?;
            let rec = self.reconcile_in(tx, &user, now)?;
            Ok(LedgerSnapshot {
                coins: rec.coins,
                issued_books: self.active_views(tx, user_id, now)?,
                auto_returned: rec.auto_returned,
                total_deducted: rec.total_deducted,
            })
        })
    }

    /// Reconcile every user, isolating failures per user.
    pub fn sync_all(&self) -> Result<BatchReport> {
        let users = self.db.list_users()?;
        let mut report = BatchReport::default();

        for user in users {
            match self.sync_fines(&user.id) {
                Ok(snapshot) => {
                    report.reconciled += 1;
                    report.total_deducted += snapshot.total_deducted;
                    if snapshot.auto_returned {
                        report.auto_returned += 1;
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(user = %user.username, error = %e, "Fine reconciliation failed");
                }
            }
        }

        tracing::info!(
            reconciled = report.reconciled,
            failed = report.failed,
            total_deducted = report.total_deducted,
            "Fine reconciliation finished"
        );
        Ok(report)
    }

    /// Wallet and loans as they stand, without posting fines.
    pub fn summary(&self, user_id: &str) -> Result<LedgerSummary> {
        let now = self.now();
        let user = self
            .db
            .get_user_by_id(user_id)?
            .ok_or(AppError::UserNotFound)?;
        let issues = self.db.get_user_issues(user_id)?;

        let total_fines: i64 = issues.iter().map(|i| i.fine).sum();
        let active: Vec<Issue> = issues.into_iter().filter(|i| i.status.is_active()).collect();

        Ok(LedgerSummary {
            coins: user.coins,
            issued_books: view::enrich(&active, now, |id| self.db.get_book(id)),
            total_fines,
        })
    }

    /// Credit purchased coins. Returns the new balance.
    pub fn purchase(&self, user_id: &str, amount: i64) -> Result<i64> {
        if amount <= 0 {
            return Err(AppError::InvalidInput("Invalid amount".to_string()));
        }

        let now = self.now();
        let coins = self.db.transaction(|tx| {
            let user = tx.get_user(user_id)?.ok_or(AppError::UserNotFound)?;
            let coins = tx.credit_coins(user_id, amount)?;
            tx.append_entry(&user, amount, EntryKind::Purchase, "Coin Purchase", now)?;
            Ok(coins)
        })?;

        tracing::info!(user_id = %user_id, amount, coins, "Coins purchased");
        Ok(coins)
    }

    /// Ledger entries of a user, newest first.
    pub fn history(&self, user_id: &str) -> Result<Vec<LedgerEntry>> {
        self.db.get_user_entries(user_id)
    }

    /// Every purchase entry, newest first.
    pub fn purchases(&self) -> Result<Vec<LedgerEntry>> {
        self.db.get_all_entries(Some(EntryKind::Purchase))
    }

    /// Whether the user currently holds `book_id`.
    pub fn holds(&self, user_id: &str, book_id: i64) -> Result<bool> {
        self.db
            .transaction(|tx| Ok(tx.find_active_issue(user_id, book_id)?.is_some()))
    }

    fn reconcile_user(&self, user_id: &str, now: i64) -> Result<Reconciliation> {
        self.db.transaction(|tx| {
            let user = tx.get_user(user_id)?.ok_or(AppError::UserNotFound)?;
            self.reconcile_in(tx, &user, now)
        })
    }

    /// Post whole-day fines on every active loan of `user`, then apply the
    /// zero-balance protocol if the wallet can no longer cover them.
    fn reconcile_in(&self, tx: &LedgerTx<'_>, user: &User, now: i64) -> Result<Reconciliation> {
        let active = tx.active_issues(&user.id)?;
        let mut total_deducted = 0;

        for issue in &active {
            let Some(accrual) = fines::accrue(issue, now, self.config.fine_per_day) else {
                continue;
            };
            if accrual.amount == 0 {
                continue;
            }
            if !tx.post_fine(issue, accrual.amount, now)? {
                tracing::debug!(issue_id = issue.id, "Fine already posted");
                continue;
            }
            total_deducted += accrual.amount;

            let title = match tx.get_book(issue.book_id) {
                Ok(Some(book)) => book.title,
                Ok(None) => PLACEHOLDER_TITLE.to_string(),
                Err(e) => {
                    tracing::warn!(book_id = issue.book_id, error = %e, "Book lookup failed");
                    PLACEHOLDER_TITLE.to_string()
                }
            };
            tx.notify(
                &user.id,
                &format!(
                    "Fine of {} coins deducted for overdue book \"{}\"",
                    accrual.amount, title
                ),
                "warning",
                now,
            )?;
            tracing::info!(
                user = %user.username,
                issue_id = issue.id,
                days = accrual.days,
                amount = accrual.amount,
                "Fine posted"
            );
        }

        let mut rec = Reconciliation {
            coins: user.coins - total_deducted,
            total_deducted,
            ..Default::default()
        };

        // An empty wallet cannot hold loans, whether or not this pass fined it.
        if rec.coins <= 0 {
            rec.coins = 0;
            rec.auto_returned = true;
            for issue in &active {
                if tx.close_issue(issue.id, now)? {
                    tx.release_copy(issue.book_id)?;
                    rec.returned_books.push(issue.book_id);
                }
            }
            if !rec.returned_books.is_empty() {
                tracing::warn!(
                    user = %user.username,
                    returned = rec.returned_books.len(),
                    "Wallet exhausted, all books returned"
                );
            }
        }

        if total_deducted > 0 {
            tx.set_coins(&user.id, rec.coins)?;
            tx.append_entry(
                user,
                -total_deducted,
                EntryKind::Fine,
                "Overdue Fines",
                now,
            )?;
        }

        Ok(rec)
    }

    fn active_views(&self, tx: &LedgerTx<'_>, user_id: &str, now: i64) -> Result<Vec<IssuedBookView>> {
        let active = tx.active_issues(user_id)?;
        Ok(view::enrich(&active, now, |id| tx.get_book(id)))
    }
}
