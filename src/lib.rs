//! coinshelf: a digital lending library with a coin wallet.
//!
//! Readers borrow books for a fixed fee, get fined per whole overdue day,
//! and lose every loan at once when fines empty their wallet.
//!
//! # Features
//!
//! - Issue and return with an atomic wallet debit
//! - Idempotent fine reconciliation with a zero-balance auto-return
//! - Append-only wallet ledger
//! - User accounts, sessions and admin tools
//! - Reading progress, highlights, reviews and notifications
//! - Tag-based dashboard recommendations

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Authentication and user management.
pub mod auth;
/// Configuration and CLI.
pub mod config;
/// Database operations.
pub mod db;
/// Error types.
pub mod error;
/// Lending ledger and fines.
pub mod ledger;
/// Catalog models and recommendations.
pub mod library;
/// HTTP server.
pub mod server;


pub use config::{Cli, Command, Config};
pub use db::Database;
pub use error::{AppError, Result};
pub use ledger::Ledger;
pub use server::AppState;
