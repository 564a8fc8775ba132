use crate::library::book::BookType;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Digital lending library with a coin wallet and overdue fines.
#[derive(Parser, Debug, Clone)]
#[command(name = "coinshelf")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "COINSHELF_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the server (default if no command given).
    Serve {
        /// Address to bind the server to.
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// User management commands.
    User {
        /// User subcommand action.
        #[command(subcommand)]
        action: UserCommand,
    },

    /// Catalog management commands.
    Book {
        /// Book subcommand action.
        #[command(subcommand)]
        action: BookCommand,
    },

    /// Lending ledger maintenance.
    Ledger {
        /// Ledger subcommand action.
        #[command(subcommand)]
        action: LedgerCommand,
    },

    /// Initialize database and create default config.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },
}

/// User management subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum UserCommand {
    /// Add a new user.
    Add {
        /// Username.
        username: String,
        /// Email address (defaults to <username>@localhost).
        #[arg(short, long)]
        email: Option<String>,
        /// Password (will prompt if not provided).
        #[arg(short, long)]
        password: Option<String>,
        /// User role (admin or user).
        #[arg(short, long, default_value = "user")]
        role: String,
    },

    /// Delete a user.
    Del {
        /// Username to delete.
        username: String,
    },

    /// List all users.
    List,

    /// Change user password.
    Passwd {
        /// Username.
        username: String,
        /// New password (will prompt if not provided).
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Credit coins to a user's wallet.
    Coins {
        /// Username.
        username: String,
        /// Number of coins to add.
        amount: i64,
    },
}

/// Catalog management subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum BookCommand {
    /// Add a book to the catalog.
    Add {
        /// Book title.
        title: String,
        /// Author name.
        #[arg(short, long)]
        author: String,
        /// Numeric ID (next free ID if omitted).
        #[arg(long)]
        id: Option<i64>,
        /// Physical copy (loaned one at a time) instead of an e-book.
        #[arg(long)]
        physical: bool,
        /// Path to the readable file (PDF, EPUB).
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Comma-separated tags.
        #[arg(short, long)]
        tags: Option<String>,
    },

    /// Remove a book from the catalog.
    Del {
        /// Book ID.
        id: i64,
    },

    /// List the catalog.
    List,
}

/// Ledger subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum LedgerCommand {
    /// Post pending fines for one user or for every user.
    Sync {
        /// Only reconcile this username.
        #[arg(short, long)]
        user: Option<String>,
    },
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Lending ledger configuration.
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Dashboard recommendation configuration.
    #[serde(default)]
    pub recommendations: RecommendationConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Library title.
    #[serde(default = "default_title")]
    pub title: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            title: default_title(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::new(
        std::net::IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0)),
        8080,
    )
}

fn default_title() -> String {
    "My Library".to_string()
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/coinshelf.db")
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Registration mode: "open", "disabled".
    #[serde(default = "default_registration")]
    pub registration: String,

    /// Session token duration in days.
    #[serde(default = "default_session_days")]
    pub session_days: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            registration: default_registration(),
            session_days: default_session_days(),
        }
    }
}

fn default_registration() -> String {
    "open".to_string()
}

fn default_session_days() -> u32 {
    30
}

impl AuthConfig {
    /// Check if registration is enabled.
    pub fn registration_enabled(&self) -> bool {
        self.registration == "open"
    }
}

/// Lending ledger configuration.
///
/// The defaults are part of the public contract with clients; change them
/// only together with the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Coins debited per issuance.
    #[serde(default = "default_issue_cost")]
    pub issue_cost: i64,

    /// Loan period in days.
    #[serde(default = "default_loan_days")]
    pub loan_days: i64,

    /// Coins charged per whole overdue day.
    #[serde(default = "default_fine_per_day")]
    pub fine_per_day: i64,

    /// Wallet balance of newly registered users.
    #[serde(default = "default_starting_coins")]
    pub starting_coins: i64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            issue_cost: default_issue_cost(),
            loan_days: default_loan_days(),
            fine_per_day: default_fine_per_day(),
            starting_coins: default_starting_coins(),
        }
    }
}

fn default_issue_cost() -> i64 {
    100
}

fn default_loan_days() -> i64 {
    7
}

fn default_fine_per_day() -> i64 {
    20
}

fn default_starting_coins() -> i64 {
    1000
}

/// Dashboard recommendation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationConfig {
    /// Maximum number of tag-based suggestions.
    #[serde(default = "default_recommendation_limit")]
    pub limit: usize,

    /// Minimum list length, topped up with top-rated books.
    #[serde(default = "default_recommendation_minimum")]
    pub minimum: usize,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            limit: default_recommendation_limit(),
            minimum: default_recommendation_minimum(),
        }
    }
}

fn default_recommendation_limit() -> usize {
    5
}

fn default_recommendation_minimum() -> usize {
    3
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &PathBuf) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to read config file: {}", e))
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to parse config file: {}", e))
        })?;

        config.ledger.validate()?;
        Ok(config)
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("coinshelf.toml"),
            dirs::config_dir()
                .map(|p| p.join("coinshelf").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/coinshelf/config.toml"),
        ];

        candidates.into_iter().find(|p| p.exists())
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# coinshelf configuration

[server]
bind = "0.0.0.0:8080"
title = "My Library"

[database]
# path = "/var/lib/coinshelf/coinshelf.db"

[auth]
# Registration mode: "open" or "disabled"
registration = "open"
# Session duration in days
session_days = 30

[ledger]
# Coins debited when a book is issued
issue_cost = 100
# Loan period in days
loan_days = 7
# Coins charged per whole overdue day
fine_per_day = 20
# Balance of newly registered users
starting_coins = 1000

[recommendations]
limit = 5
minimum = 3
"#
        .to_string()
    }
}

impl LedgerConfig {
    /// Reject values that would break the ledger arithmetic.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.issue_cost < 0 || self.fine_per_day < 0 || self.starting_coins < 0 {
            return Err(crate::error::AppError::Config(
                "ledger amounts must not be negative".to_string(),
            ));
        }
        if self.loan_days < 1 {
            return Err(crate::error::AppError::Config(
                "ledger.loan_days must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl BookCommand {
    /// Book type selected by the `--physical` flag.
    pub fn book_type(physical: bool) -> BookType {
        if physical {
            BookType::Physical
        } else {
            BookType::Ebook
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let config: Config = toml::from_str(&Config::generate_default()).unwrap();
        assert_eq!(config.ledger.issue_cost, 100);
        assert_eq!(config.ledger.loan_days, 7);
        assert_eq!(config.ledger.fine_per_day, 20);
        assert_eq!(config.ledger.starting_coins, 1000);
        assert!(config.auth.registration_enabled());
    }

    #[test]
    fn test_partial_config_keeps_ledger_defaults() {
        let config: Config = toml::from_str("[ledger]\nfine_per_day = 5\n").unwrap();
        assert_eq!(config.ledger.fine_per_day, 5);
        assert_eq!(config.ledger.issue_cost, 100);
        assert_eq!(config.recommendations.minimum, 3);
    }

    #[test]
    fn test_ledger_validation() {
        let mut ledger = LedgerConfig::default();
        assert!(ledger.validate().is_ok());
        ledger.loan_days = 0;
        assert!(ledger.validate().is_err());
    }
}
