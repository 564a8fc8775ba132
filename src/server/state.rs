//! Application state shared across handlers.

use crate::auth::AuthService;
use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::ledger::Ledger;
use crate::library::book::Book;
use crate::library::recommend::{self, Recommendation};
use mockable::Clock;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,
    /// Database connection.
    pub db: Database,
    /// Authentication service.
    pub auth: Arc<AuthService>,
    /// Lending ledger.
    pub ledger: Arc<Ledger>,
}

impl AppState {
    /// Wire services over `db`, reading ledger time from `clock`.
    pub fn new(config: Config, db: Database, clock: Arc<dyn Clock>) -> Self {
        let auth = AuthService::new(
            db.clone(),
            config.auth.session_days,
            config.auth.registration_enabled(),
            config.ledger.starting_coins,
        );
        let ledger = Ledger::new(db.clone(), clock, config.ledger.clone());

        Self {
            config: Arc::new(config),
            db,
            auth: Arc::new(auth),
            ledger: Arc::new(ledger),
        }
    }

    /// Dashboard suggestions for a user.
    pub fn recommendations(&self, user_id: &str) -> Result<Vec<Recommendation>> {
        recommend::for_user(&self.db, user_id, &self.config.recommendations)
    }

    /// Catalog entry by ID, or `BookNotFound`.
    pub fn book(&self, id: i64) -> Result<Book> {
        self.db
            .get_book(id)?
            .ok_or(crate::error::AppError::BookNotFound)
    }
}
