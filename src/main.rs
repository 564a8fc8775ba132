//! coinshelf server entry point.

use clap::Parser;
use coinshelf::{
    auth::AuthService,
    config::{BookCommand, Cli, Command, Config, LedgerCommand, UserCommand},
    db::Database,
    ledger::Ledger,
    library::book::{Book, parse_tags},
    server,
};
use mockable::DefaultClock;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Find or load config
    let config_path = cli.config.clone().or_else(Config::find_config_file);

    let config = if let Some(ref path) = config_path {
        Config::load(path)?
    } else {
        Config::default()
    };

    init_tracing();

    // Handle command
    match cli.command {
        Some(Command::Init { force }) => cmd_init(force).await,
        Some(Command::User { action }) => cmd_user(action, &config).await,
        Some(Command::Book { action }) => cmd_book(action, &config).await,
        Some(Command::Ledger { action }) => cmd_ledger(action, &config).await,
        Some(Command::Serve { bind }) => cmd_serve(config, bind).await,
        None => {
            // Default: start server
            cmd_serve(config, None).await
        }
    }
}

/// Log to stderr, filtered by `RUST_LOG`.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coinshelf=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

/// Initialize config and database.
async fn cmd_init(force: bool) -> anyhow::Result<()> {
    let config_path = PathBuf::from("config.toml");

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    // Write default config
    std::fs::write(&config_path, Config::generate_default())?;
    println!("Created config file: {}", config_path.display());

    // Initialize database
    let config = Config::default();
    let _db = Database::open(&config.database.path)?;
    println!("Initialized database: {}", config.database.path.display());

    println!("\nEdit config.toml to configure your server.");
    println!("Then run: coinshelf user add <username> --password <password> --role admin");
    println!("And: coinshelf book add <title> --author <author>");

    Ok(())
}

/// User management commands.
async fn cmd_user(action: UserCommand, config: &Config) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path)?;
    let auth = AuthService::new(
        db.clone(),
        config.auth.session_days,
        config.auth.registration_enabled(),
        config.ledger.starting_coins,
    );

    match action {
        UserCommand::Add {
            username,
            email,
            password,
            role,
        } => {
            let password = match password {
                Some(p) => p,
                None => prompt_password("Password: ")?,
            };
            let email = email.unwrap_or_else(|| format!("{}@localhost", username));

            let user = auth.create_user(&username, &email, &password, &role)?;
            println!(
                "Created user: {} (role: {}, coins: {}, id: {})",
                user.username, user.role, user.coins, user.id
            );
        }

        UserCommand::Del { username } => {
            if auth.delete_user(&username)? {
                println!("Deleted user: {}", username);
            } else {
                println!("User not found: {}", username);
            }
        }

        UserCommand::List => {
            let users = auth.list_users()?;
            if users.is_empty() {
                println!("No users found.");
            } else {
                println!(
                    "{:<20} {:<6} {:>8} {:<8} LAST LOGIN",
                    "USERNAME", "ROLE", "COINS", "BLOCKED"
                );
                println!("{}", "-".repeat(70));
                for user in users {
                    let last_login = user
                        .last_login
                        .map(|ts| {
                            chrono::DateTime::from_timestamp(ts, 0)
                                .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                                .unwrap_or_else(|| "unknown".to_string())
                        })
                        .unwrap_or_else(|| "never".to_string());
                    println!(
                        "{:<20} {:<6} {:>8} {:<8} {}",
                        user.username,
                        user.role,
                        user.coins,
                        if user.is_blocked { "yes" } else { "no" },
                        last_login
                    );
                }
            }
        }

        UserCommand::Passwd { username, password } => {
            let password = match password {
                Some(p) => p,
                None => prompt_password("New password: ")?,
            };

            if auth.change_password(&username, &password)? {
                println!("Password changed for: {}", username);
            } else {
                println!("User not found: {}", username);
            }
        }

        UserCommand::Coins { username, amount } => {
            let user = db
                .get_user_by_username(&username)?
                .ok_or_else(|| anyhow::anyhow!("User not found: {}", username))?;
            let ledger = Ledger::new(db, Arc::new(DefaultClock), config.ledger.clone());
            let coins = ledger.purchase(&user.id, amount)?;
            println!("Added {} coins to {} (balance: {})", amount, username, coins);
        }
    }

    Ok(())
}

/// Catalog management commands.
async fn cmd_book(action: BookCommand, config: &Config) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path)?;

    match action {
        BookCommand::Add {
            title,
            author,
            id,
            physical,
            file,
            tags,
        } => {
            if let Some(ref path) = file
                && !path.is_file()
            {
                anyhow::bail!("File does not exist: {}", path.display());
            }

            let id = match id {
                Some(id) => id,
                None => db.next_book_id()?,
            };

            let mut book = Book::new(id, title, author);
            book.book_type = BookCommand::book_type(physical);
            book.file_path = file;
            book.tags = tags.as_deref().map(parse_tags).unwrap_or_default();
            book.validate()?;

            db.create_book(&book)?;
            println!(
                "Added book {}: {} by {} ({})",
                book.id,
                book.title,
                book.author,
                book.book_type.as_str()
            );
        }

        BookCommand::Del { id } => {
            if db.delete_book(id)? {
                println!("Deleted book: {}", id);
            } else {
                println!("Book not found: {}", id);
            }
        }

        BookCommand::List => {
            let books = db.list_books()?;
            if books.is_empty() {
                println!("No books found.");
            } else {
                println!("{:>6} {:<9} {:<10} {:<40} AUTHOR", "ID", "TYPE", "AVAILABLE", "TITLE");
                println!("{}", "-".repeat(90));
                for book in books {
                    println!(
                        "{:>6} {:<9} {:<10} {:<40} {}",
                        book.id,
                        book.book_type.as_str(),
                        if book.available { "yes" } else { "no" },
                        book.title,
                        book.author
                    );
                }
            }
        }
    }

    Ok(())
}

/// Ledger maintenance commands.
async fn cmd_ledger(action: LedgerCommand, config: &Config) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path)?;
    let ledger = Ledger::new(db.clone(), Arc::new(DefaultClock), config.ledger.clone());

    match action {
        LedgerCommand::Sync { user: Some(username) } => {
            let user = db
                .get_user_by_username(&username)?
                .ok_or_else(|| anyhow::anyhow!("User not found: {}", username))?;
            let snapshot = ledger.sync_fines(&user.id)?;
            println!(
                "{}: fined {} coins, balance {}, {} active loans{}",
                username,
                snapshot.total_deducted,
                snapshot.coins,
                snapshot.issued_books.len(),
                if snapshot.auto_returned {
                    " (all books returned)"
                } else {
                    ""
                }
            );
        }

        LedgerCommand::Sync { user: None } => {
            let report = ledger.sync_all()?;
            println!(
                "Reconciled {} users ({} failed): {} coins fined, {} wallets emptied",
                report.reconciled, report.failed, report.total_deducted, report.auto_returned
            );
        }
    }

    Ok(())
}

/// Start the server.
async fn cmd_serve(mut config: Config, bind: Option<std::net::SocketAddr>) -> anyhow::Result<()> {
    // Override bind address if specified
    if let Some(addr) = bind {
        config.server.bind = addr;
    }

    // Open database
    let db = Database::open(&config.database.path)?;

    tracing::info!(
        bind = %config.server.bind,
        database = %config.database.path.display(),
        "Starting coinshelf server"
    );

    match db.cleanup_expired_sessions() {
        Ok(0) => {}
        Ok(removed) => tracing::info!(removed, "Removed expired sessions"),
        Err(e) => tracing::warn!(error = %e, "Session cleanup failed"),
    }

    // Create application state
    let state = server::AppState::new(config.clone(), db, Arc::new(DefaultClock));

    // Create router
    let app = server::create_router(state);

    let listener = TcpListener::bind(config.server.bind).await?;
    tracing::info!(address = %config.server.bind, "Server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Prompt for password input.
fn prompt_password(prompt: &str) -> anyhow::Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut password = String::new();
    io::stdin().read_line(&mut password)?;

    Ok(password.trim().to_string())
}
