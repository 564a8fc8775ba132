use crate::db::*;
use crate::error::{AppError, Result};
use crate::library::book::{Book, BookType};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub(super) const USER_COLUMNS: &str =
    "id, username, email, password_hash, role, is_blocked, coins, created_at, last_login";

pub(super) const BOOK_COLUMNS: &str = "id, title, author, isbn, description, image, pages, language, rating, tags_json, book_type, available, file_path, created_at";

pub(super) const ISSUE_COLUMNS: &str =
    "id, user_id, book_id, issue_date, due_date, status, fine, last_fine_check, return_date";

const ENTRY_COLUMNS: &str = "id, user_id, username, amount, kind, description, created_at";

const HIGHLIGHT_COLUMNS: &str =
    "id, user_id, book_id, page, text, note, color, kind, position_json, created_at";

/// Database wrapper for thread-safe access.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Initialize database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- Users table (wallet balance embedded)
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'user',
                is_blocked INTEGER NOT NULL DEFAULT 0,
                coins INTEGER NOT NULL DEFAULT 0 CHECK (coins >= 0),
                created_at INTEGER NOT NULL,
                last_login INTEGER
            );

            -- Sessions table
            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Catalog
            CREATE TABLE IF NOT EXISTS books (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                author TEXT NOT NULL,
                isbn TEXT UNIQUE,
                description TEXT,
                image TEXT,
                pages INTEGER,
                language TEXT,
                rating REAL NOT NULL DEFAULT 0,
                tags_json TEXT,
                book_type TEXT NOT NULL DEFAULT 'EBOOK',
                available INTEGER NOT NULL DEFAULT 1,
                file_path TEXT,
                created_at INTEGER NOT NULL
            );

            -- Loans. book_id has no foreign key: history outlives catalog entries.
            CREATE TABLE IF NOT EXISTS issues (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                book_id INTEGER NOT NULL,
                issue_date INTEGER NOT NULL,
                due_date INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'issued',
                fine INTEGER NOT NULL DEFAULT 0 CHECK (fine >= 0),
                last_fine_check INTEGER NOT NULL,
                return_date INTEGER,
                CHECK (last_fine_check >= due_date),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- At most one open loan per (user, book)
            CREATE UNIQUE INDEX IF NOT EXISTS idx_issues_active
                ON issues(user_id, book_id) WHERE status IN ('issued', 'overdue');

            -- Wallet ledger (append-only)
            CREATE TABLE IF NOT EXISTS ledger_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                username TEXT NOT NULL,
                amount INTEGER NOT NULL,
                kind TEXT NOT NULL,
                description TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE TRIGGER IF NOT EXISTS ledger_entries_append_only
                BEFORE UPDATE ON ledger_entries
            BEGIN
                SELECT RAISE(ABORT, 'ledger entries are append-only');
            END;

            -- Highlights, bookmarks and notes
            CREATE TABLE IF NOT EXISTS highlights (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                book_id INTEGER NOT NULL,
                page INTEGER NOT NULL,
                text TEXT NOT NULL DEFAULT '',
                note TEXT NOT NULL DEFAULT '',
                color TEXT NOT NULL DEFAULT '#FFEB3B',
                kind TEXT NOT NULL DEFAULT 'highlight',
                position_json TEXT,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Reading progress table
            CREATE TABLE IF NOT EXISTS reading_progress (
                user_id TEXT NOT NULL,
                book_id INTEGER NOT NULL,
                current_page INTEGER NOT NULL DEFAULT 1,
                total_pages INTEGER NOT NULL DEFAULT 0,
                time_spent INTEGER NOT NULL DEFAULT 0,
                last_read INTEGER NOT NULL,
                PRIMARY KEY (user_id, book_id),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Reviews table
            CREATE TABLE IF NOT EXISTS reviews (
                id TEXT PRIMARY KEY,
                book_id INTEGER NOT NULL,
                user_id TEXT NOT NULL,
                username TEXT NOT NULL,
                rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
                comment TEXT,
                date INTEGER NOT NULL,
                UNIQUE (user_id, book_id),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Notifications table
            CREATE TABLE IF NOT EXISTS notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                message TEXT NOT NULL,
                kind TEXT NOT NULL DEFAULT 'info',
                read INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_issues_user ON issues(user_id, status);
            CREATE INDEX IF NOT EXISTS idx_ledger_user ON ledger_entries(user_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_highlights_user_book ON highlights(user_id, book_id);
            CREATE INDEX IF NOT EXISTS idx_reviews_book ON reviews(book_id);
            CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at);
            "#,
        )
        .map_err(|e| AppError::Internal(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    /// Run `f` inside one immediate transaction.
    ///
    /// Commits when `f` returns `Ok`, rolls back otherwise. The connection
    /// stays locked for the whole closure, so `f` must not call back into
    /// other `Database` methods.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&LedgerTx<'_>) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| AppError::Internal(format!("Failed to begin transaction: {}", e)))?;

        let value = f(&LedgerTx::new(&tx))?;

        tx.commit()
            .map_err(|e| AppError::Internal(format!("Failed to commit transaction: {}", e)))?;
        Ok(value)
    }

    // ========== USER OPERATIONS ==========

    /// Create a new user.
    pub fn create_user(&self, user: &User) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (id, username, email, password_hash, role, is_blocked, coins, created_at, last_login)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                user.id,
                user.username,
                user.email,
                user.password_hash,
                user.role,
                user.is_blocked,
                user.coins,
                user.created_at,
                user.last_login,
            ],
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint") {
                AppError::InvalidInput(format!(
                    "Username '{}' or email already exists",
                    user.username
                ))
            } else {
                AppError::Internal(format!("Failed to create user: {}", e))
            }
        })?;
        Ok(())
    }

    /// Get user by username.
    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
            params![username],
            row_to_user,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get user: {}", e)))
    }

    /// Get user by ID.
    pub fn get_user_by_id(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id],
            row_to_user,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get user: {}", e)))
    }

    /// List all users.
    pub fn list_users(&self) -> Result<Vec<User>> {
        self.query_users(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY username"
        ))
    }

    /// List non-admin users.
    pub fn list_members(&self) -> Result<Vec<User>> {
        self.query_users(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE role != 'admin' ORDER BY username"
        ))
    }

    fn query_users(&self, sql: &str) -> Result<Vec<User>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let users = stmt
            .query_map([], row_to_user)
            .map_err(|e| AppError::Internal(format!("Failed to list users: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect users: {}", e)))?;

        Ok(users)
    }

    /// Update user password.
    pub fn update_user_password(&self, username: &str, password_hash: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE users SET password_hash = ?1 WHERE username = ?2",
                params![password_hash, username],
            )
            .map_err(|e| AppError::Internal(format!("Failed to update password: {}", e)))?;
        Ok(rows > 0)
    }

    /// Update user last login.
    pub fn update_user_last_login(&self, user_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE users SET last_login = ?1 WHERE id = ?2",
            params![now_timestamp(), user_id],
        )
        .map_err(|e| AppError::Internal(format!("Failed to update last login: {}", e)))?;
        Ok(())
    }

    /// Flip the blocked flag. Returns the new value, or `None` if the user is missing.
    pub fn toggle_user_block(&self, user_id: &str) -> Result<Option<bool>> {
        let conn = self.conn.lock();
        conn.query_row(
            "UPDATE users SET is_blocked = NOT is_blocked WHERE id = ?1 RETURNING is_blocked",
            params![user_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to update user: {}", e)))
    }

    /// Delete user.
    pub fn delete_user(&self, username: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute("DELETE FROM users WHERE username = ?1", params![username])
            .map_err(|e| AppError::Internal(format!("Failed to delete user: {}", e)))?;
        Ok(rows > 0)
    }

    // ========== SESSION OPERATIONS ==========

    /// Create session.
    pub fn create_session(&self, session: &Session) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
            params![session.token, session.user_id, session.expires_at],
        )
        .map_err(|e| AppError::Internal(format!("Failed to create session: {}", e)))?;
        Ok(())
    }

    /// Get session by token.
    pub fn get_session(&self, token: &str) -> Result<Option<Session>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT token, user_id, expires_at FROM sessions WHERE token = ?1",
            params![token],
            |row| {
                Ok(Session {
                    token: row.get(0)?,
                    user_id: row.get(1)?,
                    expires_at: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get session: {}", e)))
    }

    /// Delete session.
    pub fn delete_session(&self, token: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])
            .map_err(|e| AppError::Internal(format!("Failed to delete session: {}", e)))?;
        Ok(())
    }

    /// Cleanup expired sessions.
    pub fn cleanup_expired_sessions(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "DELETE FROM sessions WHERE expires_at < ?1",
                params![now_timestamp()],
            )
            .map_err(|e| AppError::Internal(format!("Failed to cleanup sessions: {}", e)))?;
        Ok(rows)
    }

    // ========== BOOK OPERATIONS ==========

    /// Insert a catalog entry.
    pub fn create_book(&self, book: &Book) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO books
             (id, title, author, isbn, description, image, pages, language, rating, tags_json,
              book_type, available, file_path, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                book.id,
                book.title,
                book.author,
                book.isbn,
                book.description,
                book.image,
                book.pages,
                book.language,
                book.rating,
                tags_to_json(&book.tags),
                book.book_type.as_str(),
                book.available,
                path_to_text(book.file_path.as_deref()),
                book.created_at,
            ],
        )
        .map_err(|e| {
            let msg = e.to_string();
            if msg.contains("UNIQUE constraint failed: books.isbn") {
                AppError::InvalidInput("Book with this ISBN already exists.".to_string())
            } else if msg.contains("UNIQUE constraint") {
                AppError::InvalidInput(format!("Book with ID {} already exists.", book.id))
            } else {
                AppError::Internal(format!("Failed to create book: {}", e))
            }
        })?;
        Ok(())
    }

    /// Replace the editable fields of a catalog entry.
    ///
    /// The book type can only change while nothing is on loan, and a type
    /// change puts the book back on the shelf. The stored rating is kept.
    pub fn update_book(&self, book: &Book) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE books SET title = ?2, author = ?3, isbn = ?4, description = ?5, image = ?6,
                    pages = ?7, language = ?8, tags_json = ?9, file_path = ?11,
                    available = CASE WHEN book_type = ?10 THEN available ELSE 1 END,
                    book_type = ?10
                 WHERE id = ?1
                   AND (book_type = ?10 OR NOT EXISTS (
                       SELECT 1 FROM issues
                       WHERE book_id = ?1 AND status IN ('issued', 'overdue')))",
                params![
                    book.id,
                    book.title,
                    book.author,
                    book.isbn,
                    book.description,
                    book.image,
                    book.pages,
                    book.language,
                    tags_to_json(&book.tags),
                    book.book_type.as_str(),
                    path_to_text(book.file_path.as_deref()),
                ],
            )
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("UNIQUE constraint failed: books.isbn") {
                    AppError::InvalidInput("A book with this ISBN already exists".to_string())
                } else {
                    AppError::Internal(format!("Failed to update book: {}", e))
                }
            })?;
        if rows > 0 {
            return Ok(true);
        }

        let exists: bool = conn
            .query_row(
                "SELECT EXISTS (SELECT 1 FROM books WHERE id = ?1)",
                params![book.id],
                |row| row.get(0),
            )
            .map_err(|e| AppError::Internal(format!("Failed to get book: {}", e)))?;
        if exists {
            return Err(AppError::InvalidInput(
                "Cannot change the type of a book that is on loan".to_string(),
            ));
        }
        Ok(false)
    }

    /// Set a book's rating to the average of its reviews, one decimal.
    pub fn refresh_book_rating(&self, book_id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE books SET rating = COALESCE(
                    (SELECT ROUND(AVG(rating), 1) FROM reviews WHERE book_id = ?1), 0.0)
                 WHERE id = ?1",
                params![book_id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to update rating: {}", e)))?;
        Ok(rows > 0)
    }

    /// Get book by ID.
    pub fn get_book(&self, id: i64) -> Result<Option<Book>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {BOOK_COLUMNS} FROM books WHERE id = ?1"),
            params![id],
            row_to_book,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get book: {}", e)))
    }

    /// List the whole catalog by ID.
    pub fn list_books(&self) -> Result<Vec<Book>> {
        self.query_books(&format!("SELECT {BOOK_COLUMNS} FROM books ORDER BY id"), [])
    }

    /// Case-insensitive title/author search.
    pub fn search_books(&self, query: &str) -> Result<Vec<Book>> {
        let pattern = format!("%{}%", query.trim());
        self.query_books(
            &format!(
                "SELECT {BOOK_COLUMNS} FROM books
                 WHERE title LIKE ?1 OR author LIKE ?1 OR isbn = ?2
                 ORDER BY id"
            ),
            params![pattern, query.trim()],
        )
    }

    fn query_books<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Book>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let books = stmt
            .query_map(params, row_to_book)
            .map_err(|e| AppError::Internal(format!("Failed to get books: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect books: {}", e)))?;

        Ok(books)
    }

    /// Next unused catalog ID.
    pub fn next_book_id(&self) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COALESCE(MAX(id), 0) + 1 FROM books", [], |row| {
            row.get(0)
        })
        .map_err(|e| AppError::Internal(format!("Failed to allocate book id: {}", e)))
    }

    /// Delete a single book by ID.
    pub fn delete_book(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute("DELETE FROM books WHERE id = ?1", params![id])
            .map_err(|e| AppError::Internal(format!("Failed to delete book: {}", e)))?;
        Ok(rows > 0)
    }

    // ========== ISSUE & LEDGER READS ==========

    /// Every issue of a user, oldest first.
    pub fn get_user_issues(&self, user_id: &str) -> Result<Vec<Issue>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ISSUE_COLUMNS} FROM issues WHERE user_id = ?1 ORDER BY issue_date, id"
            ))
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let issues = stmt
            .query_map(params![user_id], row_to_issue)
            .map_err(|e| AppError::Internal(format!("Failed to get issues: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect issues: {}", e)))?;

        Ok(issues)
    }

    /// Ledger entries of one user, newest first.
    pub fn get_user_entries(&self, user_id: &str) -> Result<Vec<LedgerEntry>> {
        self.query_entries(
            &format!(
                "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE user_id = ?1
                 ORDER BY created_at DESC, id DESC"
            ),
            params![user_id],
        )
    }

    /// Ledger entries of every user, newest first, optionally of one kind.
    pub fn get_all_entries(&self, kind: Option<EntryKind>) -> Result<Vec<LedgerEntry>> {
        self.query_entries(
            &format!(
                "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE ?1 IS NULL OR kind = ?1
                 ORDER BY created_at DESC, id DESC"
            ),
            params![kind.map(|k| k.as_str())],
        )
    }

    fn query_entries<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<LedgerEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let entries = stmt
            .query_map(params, row_to_entry)
            .map_err(|e| AppError::Internal(format!("Failed to get ledger: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect ledger: {}", e)))?;

        Ok(entries)
    }

    // ========== PROGRESS OPERATIONS ==========

    /// Record a reading session. Time spent accumulates across calls.
    pub fn save_progress(
        &self,
        user_id: &str,
        book_id: i64,
        page: i64,
        total_pages: Option<i64>,
        duration: Option<i64>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO reading_progress
             (user_id, book_id, current_page, total_pages, time_spent, last_read)
             VALUES (?1, ?2, ?3, COALESCE(?4, 0), COALESCE(?5, 0), ?6)
             ON CONFLICT (user_id, book_id) DO UPDATE SET
                current_page = excluded.current_page,
                total_pages = COALESCE(?4, reading_progress.total_pages),
                time_spent = reading_progress.time_spent + excluded.time_spent,
                last_read = excluded.last_read",
            params![
                user_id,
                book_id,
                page,
                total_pages,
                duration.map(|d| d.max(0)),
                now_timestamp()
            ],
        )
        .map_err(|e| AppError::Internal(format!("Failed to save progress: {}", e)))?;
        Ok(())
    }

    /// Get reading progress for a book.
    pub fn get_progress(&self, user_id: &str, book_id: i64) -> Result<Option<ReadingProgress>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT user_id, book_id, current_page, total_pages, time_spent, last_read
             FROM reading_progress WHERE user_id = ?1 AND book_id = ?2",
            params![user_id, book_id],
            row_to_progress,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get progress: {}", e)))
    }

    /// Reading history, most time spent first.
    pub fn get_reading_history(&self, user_id: &str) -> Result<Vec<ReadingProgress>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT user_id, book_id, current_page, total_pages, time_spent, last_read
                 FROM reading_progress WHERE user_id = ?1
                 ORDER BY time_spent DESC, last_read DESC",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let history = stmt
            .query_map(params![user_id], row_to_progress)
            .map_err(|e| AppError::Internal(format!("Failed to get history: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect history: {}", e)))?;

        Ok(history)
    }

    // ========== HIGHLIGHT OPERATIONS ==========

    /// Save a highlight.
    pub fn save_highlight(&self, highlight: &Highlight) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO highlights
             (id, user_id, book_id, page, text, note, color, kind, position_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                highlight.id,
                highlight.user_id,
                highlight.book_id,
                highlight.page,
                highlight.text,
                highlight.note,
                highlight.color,
                highlight.kind.as_str(),
                highlight.position.to_string(),
                highlight.created_at,
            ],
        )
        .map_err(|e| AppError::Internal(format!("Failed to save highlight: {}", e)))?;
        Ok(())
    }

    /// Get highlights for a book.
    pub fn get_highlights(&self, user_id: &str, book_id: i64) -> Result<Vec<Highlight>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {HIGHLIGHT_COLUMNS} FROM highlights WHERE user_id = ?1 AND book_id = ?2
                 ORDER BY page, created_at"
            ))
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let highlights = stmt
            .query_map(params![user_id, book_id], row_to_highlight)
            .map_err(|e| AppError::Internal(format!("Failed to get highlights: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect highlights: {}", e)))?;

        Ok(highlights)
    }

    /// Patch text, note and color of an owned highlight.
    pub fn update_highlight(
        &self,
        id: &str,
        user_id: &str,
        text: Option<&str>,
        note: Option<&str>,
        color: Option<&str>,
    ) -> Result<Option<Highlight>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!(
                "UPDATE highlights SET
                    text = COALESCE(?3, text),
                    note = COALESCE(?4, note),
                    color = COALESCE(?5, color)
                 WHERE id = ?1 AND user_id = ?2
                 RETURNING {HIGHLIGHT_COLUMNS}"
            ),
            params![id, user_id, text, note, color],
            row_to_highlight,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to update highlight: {}", e)))
    }

    /// Delete highlight.
    pub fn delete_highlight(&self, id: &str, user_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "DELETE FROM highlights WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to delete highlight: {}", e)))?;
        Ok(rows > 0)
    }

    // ========== REVIEW OPERATIONS ==========

    /// Insert or replace the user's review of a book. Returns true when created.
    pub fn save_review(&self, review: &Review) -> Result<bool> {
        let conn = self.conn.lock();
        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM reviews WHERE user_id = ?1 AND book_id = ?2",
                params![review.user_id, review.book_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| AppError::Internal(format!("Failed to get review: {}", e)))?;

        match existing {
            Some(id) => {
                conn.execute(
                    "UPDATE reviews SET rating = ?2, comment = ?3, date = ?4 WHERE id = ?1",
                    params![id, review.rating, review.comment, review.date],
                )
                .map_err(|e| AppError::Internal(format!("Failed to update review: {}", e)))?;
                Ok(false)
            }
            None => {
                conn.execute(
                    "INSERT INTO reviews (id, book_id, user_id, username, rating, comment, date)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        review.id,
                        review.book_id,
                        review.user_id,
                        review.username,
                        review.rating,
                        review.comment,
                        review.date,
                    ],
                )
                .map_err(|e| AppError::Internal(format!("Failed to save review: {}", e)))?;
                Ok(true)
            }
        }
    }

    /// Reviews of a book, newest first. `None` lists every review.
    pub fn get_reviews(&self, book_id: Option<i64>) -> Result<Vec<Review>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, book_id, user_id, username, rating, comment, date
                 FROM reviews WHERE ?1 IS NULL OR book_id = ?1
                 ORDER BY date DESC",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let reviews = stmt
            .query_map(params![book_id], |row| {
                Ok(Review {
                    id: row.get(0)?,
                    book_id: row.get(1)?,
                    user_id: row.get(2)?,
                    username: row.get(3)?,
                    rating: row.get(4)?,
                    comment: row.get(5)?,
                    date: row.get(6)?,
                })
            })
            .map_err(|e| AppError::Internal(format!("Failed to get reviews: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect reviews: {}", e)))?;

        Ok(reviews)
    }

    /// Delete a review.
    pub fn delete_review(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute("DELETE FROM reviews WHERE id = ?1", params![id])
            .map_err(|e| AppError::Internal(format!("Failed to delete review: {}", e)))?;
        Ok(rows > 0)
    }

    // ========== NOTIFICATION OPERATIONS ==========

    /// Notifications of a user, newest first.
    pub fn get_notifications(&self, user_id: &str) -> Result<Vec<Notification>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, message, kind, read, created_at
                 FROM notifications WHERE user_id = ?1
                 ORDER BY created_at DESC, id DESC",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let notifications = stmt
            .query_map(params![user_id], |row| {
                Ok(Notification {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    message: row.get(2)?,
                    kind: row.get(3)?,
                    read: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })
            .map_err(|e| AppError::Internal(format!("Failed to get notifications: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect notifications: {}", e)))?;

        Ok(notifications)
    }
}

// ========== ROW MAPPING ==========

/// Map a stored enum string, failing the row on unknown values.
fn parse_column<T>(idx: usize, value: String, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    parse(&value).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unexpected value: {}", value).into(),
        )
    })
}

pub(super) fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        role: row.get(4)?,
        is_blocked: row.get(5)?,
        coins: row.get(6)?,
        created_at: row.get(7)?,
        last_login: row.get(8)?,
    })
}

pub(super) fn row_to_book(row: &rusqlite::Row<'_>) -> rusqlite::Result<Book> {
    let tags_json: Option<String> = row.get(9)?;
    let file_path: Option<String> = row.get(12)?;

    Ok(Book {
        id: row.get(0)?,
        title: row.get(1)?,
        author: row.get(2)?,
        isbn: row.get(3)?,
        description: row.get(4)?,
        image: row.get(5)?,
        pages: row.get(6)?,
        language: row.get(7)?,
        rating: row.get(8)?,
        tags: tags_json
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        book_type: parse_column(10, row.get(10)?, BookType::parse)?,
        available: row.get(11)?,
        file_path: file_path.map(PathBuf::from),
        created_at: row.get(13)?,
    })
}

pub(super) fn row_to_issue(row: &rusqlite::Row<'_>) -> rusqlite::Result<Issue> {
    Ok(Issue {
        id: row.get(0)?,
        user_id: row.get(1)?,
        book_id: row.get(2)?,
        issue_date: row.get(3)?,
        due_date: row.get(4)?,
        status: parse_column(5, row.get(5)?, IssueStatus::parse)?,
        fine: row.get(6)?,
        last_fine_check: row.get(7)?,
        return_date: row.get(8)?,
    })
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerEntry> {
    Ok(LedgerEntry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        username: row.get(2)?,
        amount: row.get(3)?,
        kind: parse_column(4, row.get(4)?, EntryKind::parse)?,
        description: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn row_to_highlight(row: &rusqlite::Row<'_>) -> rusqlite::Result<Highlight> {
    let position: Option<String> = row.get(8)?;

    Ok(Highlight {
        id: row.get(0)?,
        user_id: row.get(1)?,
        book_id: row.get(2)?,
        page: row.get(3)?,
        text: row.get(4)?,
        note: row.get(5)?,
        color: row.get(6)?,
        kind: parse_column(7, row.get(7)?, HighlightKind::parse)?,
        position: position
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_else(|| serde_json::json!({})),
        created_at: row.get(9)?,
    })
}

fn row_to_progress(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReadingProgress> {
    Ok(ReadingProgress {
        user_id: row.get(0)?,
        book_id: row.get(1)?,
        current_page: row.get(2)?,
        total_pages: row.get(3)?,
        time_spent: row.get(4)?,
        last_read: row.get(5)?,
    })
}

fn tags_to_json(tags: &[String]) -> Option<String> {
    if tags.is_empty() {
        None
    } else {
        serde_json::to_string(tags).ok()
    }
}

fn path_to_text(path: Option<&Path>) -> Option<String> {
    path.map(|p| p.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_entries_are_append_only() {
        let db = Database::open_memory().unwrap();
        let conn = db.conn.lock();
        conn.execute(
            "INSERT INTO users (id, username, email, password_hash, created_at)
             VALUES ('u1', 'alice', 'a@b.c', 'hash', 0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO ledger_entries (user_id, username, amount, kind, description, created_at)
             VALUES ('u1', 'alice', 100, 'PURCHASE', 'Coin Purchase', 0)",
            [],
        )
        .unwrap();

        let err = conn
            .execute("UPDATE ledger_entries SET amount = 1", [])
            .unwrap_err();
        assert!(err.to_string().contains("append-only"));
    }

    #[test]
    fn test_second_open_issue_is_rejected() {
        let db = Database::open_memory().unwrap();
        {
            let conn = db.conn.lock();
            conn.execute(
                "INSERT INTO users (id, username, email, password_hash, created_at)
                 VALUES ('u1', 'alice', 'a@b.c', 'hash', 0)",
                [],
            )
            .unwrap();
        }

        db.transaction(|tx| {
            tx.insert_issue("u1", 42, 0, 100)?;
            assert!(matches!(
                tx.insert_issue("u1", 42, 0, 100),
                Err(AppError::DuplicateIssue)
            ));
            Ok(())
        })
        .unwrap();
    }
}
