//! HTTP request handlers.

use crate::db::{self, Highlight, HighlightKind, LedgerEntry, Notification, Review, User};
use crate::error::{AppError, Result};
use crate::ledger::ZERO_BALANCE_MESSAGE;
use crate::ledger::view::IssuedBookView;
use crate::library::book::{Book, BookType};
use crate::library::recommend::Recommendation;
use crate::server::AppState;
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::Response,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio_util::io::ReaderStream;

/// Plain `{message}` reply.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    message: String,
}

impl MessageResponse {
    fn reply(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
        })
    }
}

// ============================================================================
// AUTH API
// ============================================================================

/// Login request.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
}

/// Login response.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    token: String,
    user: User,
}

/// Register request.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    username: String,
    email: String,
    password: String,
}

/// Auth login.
pub async fn auth_login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    let (user, token) = state.auth.login(&req.username, &req.password)?;
    Ok(Json(LoginResponse { token, user }))
}

/// Auth register.
pub async fn auth_register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<LoginResponse>)> {
    state
        .auth
        .register(&req.username, &req.email, &req.password)?;
    let (user, token) = state.auth.login(&req.username, &req.password)?;

    Ok((StatusCode::CREATED, Json(LoginResponse { token, user })))
}

/// Auth logout.
pub async fn auth_logout(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode> {
    if let Some(token) = extract_token(&headers) {
        state.auth.logout(&token)?;
    }
    Ok(StatusCode::OK)
}

/// Get current user info.
pub async fn auth_me(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<User>> {
    let user = get_authenticated_user(&state, &headers).await?;
    Ok(Json(user))
}

// ============================================================================
// CATALOG API
// ============================================================================

/// Search query parameters.
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    q: String,
}

/// Whole catalog.
pub async fn books_list(State(state): State<AppState>) -> Result<Json<Vec<Book>>> {
    Ok(Json(state.db.list_books()?))
}

/// Book metadata.
pub async fn book_get(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Book>> {
    Ok(Json(state.book(id)?))
}

/// Title/author search.
pub async fn books_search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Book>>> {
    if query.q.trim().is_empty() {
        return Ok(Json(Vec::new()));
    }
    Ok(Json(state.db.search_books(&query.q)?))
}

// ============================================================================
// LENDING API
// ============================================================================

/// Issue request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueRequest {
    book_id: i64,
    book_title: Option<String>,
}

/// Issue response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueResponse {
    message: String,
    coins: i64,
    issued_books: Vec<IssuedBookView>,
}

/// Return request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnRequest {
    book_id: i64,
}

/// Wallet and loans after a return or a fine sync.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerResponse {
    message: String,
    coins: i64,
    issued_books: Vec<IssuedBookView>,
    auto_returned: bool,
}

/// Dashboard response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResponse {
    coins: i64,
    issued_books: Vec<IssuedBookView>,
    total_fines: i64,
    recommendations: Vec<Recommendation>,
}

/// Issue a book.
pub async fn library_issue(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<IssueRequest>,
) -> Result<Json<IssueResponse>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let outcome = state
        .ledger
        .issue(&user.id, req.book_id, req.book_title.as_deref())?;

    Ok(Json(IssueResponse {
        message: format!("Issued \"{}\" successfully!", outcome.title),
        coins: outcome.coins,
        issued_books: outcome.issued_books,
    }))
}

/// Return a book.
pub async fn library_return(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ReturnRequest>,
) -> Result<Json<LedgerResponse>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let snapshot = state.ledger.return_book(&user.id, req.book_id)?;

    let message = if snapshot.auto_returned {
        ZERO_BALANCE_MESSAGE
    } else {
        "Book returned successfully!"
    };

    Ok(Json(LedgerResponse {
        message: message.to_string(),
        coins: snapshot.coins,
        issued_books: snapshot.issued_books,
        auto_returned: snapshot.auto_returned,
    }))
}

/// Post pending fines.
pub async fn library_sync_fines(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<LedgerResponse>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let snapshot = state.ledger.sync_fines(&user.id)?;

    let message = if snapshot.auto_returned {
        ZERO_BALANCE_MESSAGE
    } else {
        "Synced."
    };

    Ok(Json(LedgerResponse {
        message: message.to_string(),
        coins: snapshot.coins,
        issued_books: snapshot.issued_books,
        auto_returned: snapshot.auto_returned,
    }))
}

/// Wallet, loans and suggestions.
pub async fn library_dashboard(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<DashboardResponse>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let summary = state.ledger.summary(&user.id)?;

    // Suggestions are best effort.
    let recommendations = state.recommendations(&user.id).unwrap_or_else(|e| {
        tracing::warn!(user = %user.username, error = %e, "Recommendations failed");
        Vec::new()
    });

    Ok(Json(DashboardResponse {
        coins: summary.coins,
        issued_books: summary.issued_books,
        total_fines: summary.total_fines,
        recommendations,
    }))
}

// ============================================================================
// PAYMENT API
// ============================================================================

/// Coin purchase request.
#[derive(Debug, Deserialize)]
pub struct CoinsRequest {
    amount: i64,
}

/// Coin purchase response.
#[derive(Debug, Serialize)]
pub struct CoinsResponse {
    message: String,
    coins: i64,
}

/// Buy coins.
pub async fn payment_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CoinsRequest>,
) -> Result<Json<CoinsResponse>> {
    let user = get_authenticated_user(&state, &headers).await?;
    let coins = state.ledger.purchase(&user.id, req.amount)?;

    Ok(Json(CoinsResponse {
        message: format!("Added {} coins", req.amount),
        coins,
    }))
}

/// Wallet history of the caller.
pub async fn payment_history(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<LedgerEntry>>> {
    let user = get_authenticated_user(&state, &headers).await?;
    Ok(Json(state.ledger.history(&user.id)?))
}

/// Every purchase (admin).
pub async fn payment_all(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<LedgerEntry>>> {
    require_admin(&state, &headers).await?;
    Ok(Json(state.ledger.purchases()?))
}

// ============================================================================
// READING API
// ============================================================================

/// Progress update request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRequest {
    book_id: i64,
    page: i64,
    total_pages: Option<i64>,
    duration: Option<i64>,
}

/// Reading position.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressResponse {
    last_page: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_pages: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_spent: Option<i64>,
}

/// Stream the readable file of a book the caller holds.
pub async fn library_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(book_id): Path<i64>,
) -> Result<Response<Body>> {
    let user = get_authenticated_user(&state, &headers).await?;

    if !state.ledger.holds(&user.id, book_id)? {
        return Err(AppError::Forbidden(
            "You must issue this book to read it.".to_string(),
        ));
    }

    let book = state.book(book_id)?;
    let path = book
        .file_path
        .ok_or_else(|| AppError::NotFound("No readable file for this book".to_string()))?;

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(book_id, path = %path.display(), "Book file missing");
            return Err(AppError::NotFound(
                "No readable file for this book".to_string(),
            ));
        }
        Err(e) => return Err(e.into()),
    };
    let size = file.metadata().await?.len();
    let body = Body::from_stream(ReaderStream::new(file));

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime_type(&path))
        .header(header::CONTENT_LENGTH, size)
        .body(body)
        .unwrap_or_else(|_| Response::default()))
}

/// Save reading progress.
pub async fn progress_save(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ProgressRequest>,
) -> Result<Json<MessageResponse>> {
    let user = get_authenticated_user(&state, &headers).await?;

    if req.page < 1 {
        return Err(AppError::InvalidInput("Page must be at least 1".to_string()));
    }

    state
        .db
        .save_progress(&user.id, req.book_id, req.page, req.total_pages, req.duration)?;
    Ok(MessageResponse::reply("Progress saved"))
}

/// Get reading progress.
pub async fn progress_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(book_id): Path<i64>,
) -> Result<Json<ProgressResponse>> {
    let user = get_authenticated_user(&state, &headers).await?;

    let response = match state.db.get_progress(&user.id, book_id)? {
        Some(progress) => ProgressResponse {
            last_page: progress.current_page,
            total_pages: Some(progress.total_pages),
            time_spent: Some(progress.time_spent),
        },
        None => ProgressResponse {
            last_page: 1,
            total_pages: None,
            time_spent: None,
        },
    };
    Ok(Json(response))
}

// ============================================================================
// HIGHLIGHTS API
// ============================================================================

/// Highlight creation request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightRequest {
    book_id: i64,
    page: i64,
    text: Option<String>,
    note: Option<String>,
    color: Option<String>,
    #[serde(rename = "type")]
    kind: Option<HighlightKind>,
    position: Option<serde_json::Value>,
}

/// Highlight patch request.
#[derive(Debug, Deserialize)]
pub struct HighlightUpdate {
    text: Option<String>,
    note: Option<String>,
    color: Option<String>,
}

/// Get highlights for a book.
pub async fn highlights_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(book_id): Path<i64>,
) -> Result<Json<Vec<Highlight>>> {
    let user = get_authenticated_user(&state, &headers).await?;
    Ok(Json(state.db.get_highlights(&user.id, book_id)?))
}

/// Add a highlight, bookmark or note.
pub async fn highlight_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<HighlightRequest>,
) -> Result<(StatusCode, Json<Highlight>)> {
    let user = get_authenticated_user(&state, &headers).await?;

    if req.page < 1 {
        return Err(AppError::InvalidInput(
            "Book ID and page are required".to_string(),
        ));
    }

    let highlight = Highlight {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user.id,
        book_id: req.book_id,
        page: req.page,
        text: req.text.unwrap_or_default(),
        note: req.note.unwrap_or_default(),
        color: req.color.unwrap_or_else(|| "#FFEB3B".to_string()),
        kind: req.kind.unwrap_or(HighlightKind::Highlight),
        position: req.position.unwrap_or_else(|| serde_json::json!({})),
        created_at: db::now_timestamp(),
    };

    state.db.save_highlight(&highlight)?;
    Ok((StatusCode::CREATED, Json(highlight)))
}

/// Edit an owned highlight.
pub async fn highlight_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<HighlightUpdate>,
) -> Result<Json<Highlight>> {
    let user = get_authenticated_user(&state, &headers).await?;

    state
        .db
        .update_highlight(
            &id,
            &user.id,
            req.text.as_deref(),
            req.note.as_deref(),
            req.color.as_deref(),
        )?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Highlight not found".to_string()))
}

/// Delete an owned highlight.
pub async fn highlight_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>> {
    let user = get_authenticated_user(&state, &headers).await?;

    if !state.db.delete_highlight(&id, &user.id)? {
        return Err(AppError::NotFound("Highlight not found".to_string()));
    }
    Ok(MessageResponse::reply("Highlight deleted"))
}

// ============================================================================
// REVIEWS API
// ============================================================================

/// Review request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    book_id: i64,
    rating: i64,
    comment: Option<String>,
}

/// Reviews of a book.
pub async fn reviews_get(
    State(state): State<AppState>,
    Path(book_id): Path<i64>,
) -> Result<Json<Vec<Review>>> {
    Ok(Json(state.db.get_reviews(Some(book_id))?))
}

/// Add or replace the caller's review.
pub async fn review_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ReviewRequest>,
) -> Result<Json<MessageResponse>> {
    let user = get_authenticated_user(&state, &headers).await?;

    if !(1..=5).contains(&req.rating) {
        return Err(AppError::InvalidInput(
            "Rating must be between 1 and 5".to_string(),
        ));
    }
    state.book(req.book_id)?;

    let review = Review {
        id: uuid::Uuid::new_v4().to_string(),
        book_id: req.book_id,
        user_id: user.id,
        username: user.username,
        rating: req.rating,
        comment: req.comment.filter(|c| !c.trim().is_empty()),
        date: db::now_timestamp(),
    };

    let created = state.db.save_review(&review)?;
    state.db.refresh_book_rating(req.book_id)?;

    Ok(MessageResponse::reply(if created {
        "Review added"
    } else {
        "Review updated"
    }))
}

// ============================================================================
// NOTIFICATIONS API
// ============================================================================

/// Notifications of the caller.
pub async fn notifications_list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Notification>>> {
    let user = get_authenticated_user(&state, &headers).await?;
    Ok(Json(state.db.get_notifications(&user.id)?))
}

// ============================================================================
// ADMIN API
// ============================================================================

/// Catalog entry fields accepted from admins.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookRequest {
    id: Option<i64>,
    title: Option<String>,
    author: Option<String>,
    isbn: Option<String>,
    description: Option<String>,
    image: Option<String>,
    pages: Option<i64>,
    language: Option<String>,
    tags: Option<Vec<String>>,
    book_type: Option<BookType>,
    file_path: Option<PathBuf>,
}

impl BookRequest {
    /// Overlay the supplied fields onto `book`.
    fn apply(self, book: &mut Book) {
        if let Some(title) = self.title {
            book.title = title.trim().to_string();
        }
        if let Some(author) = self.author {
            book.author = author.trim().to_string();
        }
        if self.isbn.is_some() {
            book.isbn = self.isbn.filter(|s| !s.trim().is_empty());
        }
        if self.description.is_some() {
            book.description = self.description;
        }
        if self.image.is_some() {
            book.image = self.image;
        }
        if self.pages.is_some() {
            book.pages = self.pages;
        }
        if self.language.is_some() {
            book.language = self.language;
        }
        if let Some(tags) = self.tags {
            book.tags = tags;
        }
        if let Some(book_type) = self.book_type {
            book.book_type = book_type;
        }
        if self.file_path.is_some() {
            book.file_path = self.file_path;
        }
    }
}

/// Block toggle response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockResponse {
    message: String,
    is_blocked: bool,
}

/// Non-admin accounts.
pub async fn admin_users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<User>>> {
    require_admin(&state, &headers).await?;
    Ok(Json(state.db.list_members()?))
}

/// Block or unblock an account.
pub async fn admin_block_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<BlockResponse>> {
    let admin = require_admin(&state, &headers).await?;

    if admin.id == id {
        return Err(AppError::InvalidInput(
            "You cannot block yourself".to_string(),
        ));
    }

    let is_blocked = state
        .db
        .toggle_user_block(&id)?
        .ok_or(AppError::UserNotFound)?;

    tracing::info!(admin = %admin.username, user_id = %id, is_blocked, "User block toggled");
    Ok(Json(BlockResponse {
        message: if is_blocked {
            "User blocked".to_string()
        } else {
            "User unblocked".to_string()
        },
        is_blocked,
    }))
}

/// Add a catalog entry.
pub async fn admin_book_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<BookRequest>,
) -> Result<(StatusCode, Json<Book>)> {
    require_admin(&state, &headers).await?;

    let id = match req.id {
        Some(id) => id,
        None => state.db.next_book_id()?,
    };
    let mut book = Book::new(id, "", "");
    req.apply(&mut book);
    book.validate()?;

    state.db.create_book(&book)?;
    tracing::info!(book_id = book.id, title = %book.title, "Book added");
    Ok((StatusCode::CREATED, Json(book)))
}

/// Edit a catalog entry.
pub async fn admin_book_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(req): Json<BookRequest>,
) -> Result<Json<Book>> {
    require_admin(&state, &headers).await?;

    let mut book = state.book(id)?;
    req.apply(&mut book);
    book.id = id;
    book.validate()?;

    if !state.db.update_book(&book)? {
        return Err(AppError::BookNotFound);
    }
    tracing::info!(book_id = id, "Book updated");
    Ok(Json(state.book(id)?))
}

/// Remove a catalog entry. Loan history keeps its book IDs.
pub async fn admin_book_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>> {
    require_admin(&state, &headers).await?;

    if !state.db.delete_book(id)? {
        return Err(AppError::BookNotFound);
    }
    tracing::info!(book_id = id, "Book deleted");
    Ok(MessageResponse::reply("Book deleted"))
}

/// Every review.
pub async fn admin_reviews(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Review>>> {
    require_admin(&state, &headers).await?;
    Ok(Json(state.db.get_reviews(None)?))
}

/// Remove a review.
pub async fn admin_review_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>> {
    require_admin(&state, &headers).await?;

    let review = state
        .db
        .get_reviews(None)?
        .into_iter()
        .find(|r| r.id == id)
        .ok_or_else(|| AppError::NotFound("Review not found".to_string()))?;

    state.db.delete_review(&id)?;
    state.db.refresh_book_rating(review.book_id)?;
    Ok(MessageResponse::reply("Review deleted"))
}

// ============================================================================
// HELPERS
// ============================================================================

/// Content type from the file extension.
fn mime_type(path: &std::path::Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("pdf") => "application/pdf",
        Some("epub") => "application/epub+zip",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// Extract token from Authorization header.
fn extract_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// Get authenticated user from token.
async fn get_authenticated_user(state: &AppState, headers: &HeaderMap) -> Result<User> {
    let token = extract_token(headers)
        .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".to_string()))?;

    state
        .auth
        .validate_token(&token)?
        .ok_or_else(|| AppError::Unauthorized("Invalid or expired token".to_string()))
}

/// Get authenticated admin.
async fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<User> {
    let user = get_authenticated_user(state, headers).await?;
    if !state.auth.is_admin(&user) {
        return Err(AppError::Forbidden("Admin access required".to_string()));
    }
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::Database;
    use crate::tests::MutableClock;
    use axum::response::IntoResponse;
    use std::sync::Arc;

    fn state_with_reader() -> (AppState, HeaderMap) {
        let (state, headers, _) = state_with_clock();
        (state, headers)
    }

    fn state_with_clock() -> (AppState, HeaderMap, Arc<MutableClock>) {
        let db = Database::open_memory().unwrap();
        let clock = Arc::new(MutableClock::at(1_700_000_000));
        let state = AppState::new(Config::default(), db, clock.clone());
        state
            .auth
            .register("reader", "reader@example.com", "secret")
            .unwrap();
        let (_, token) = state.auth.login("reader", "secret").unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            format!("Bearer {}", token).parse().unwrap(),
        );
        (state, headers, clock)
    }

    #[test]
    fn test_requests_without_token_are_unauthorized() {
        let (state, _) = state_with_reader();
        let err = tokio_test::block_on(library_dashboard(State(state), HeaderMap::new()))
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_issue_then_read_streams_file() {
        let (state, headers) = state_with_reader();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dune.epub");
        std::fs::write(&path, b"spice").unwrap();

        let mut book = Book::new(1, "Dune", "Frank Herbert");
        book.file_path = Some(path);
        state.db.create_book(&book).unwrap();

        let denied = tokio_test::block_on(library_read(
            State(state.clone()),
            headers.clone(),
            Path(1),
        ))
        .unwrap_err();
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);

        let Json(issued) = tokio_test::block_on(library_issue(
            State(state.clone()),
            headers.clone(),
            Json(IssueRequest {
                book_id: 1,
                book_title: None,
            }),
        ))
        .unwrap();
        assert_eq!(issued.message, "Issued \"Dune\" successfully!");
        assert_eq!(issued.coins, 900);

        let response =
            tokio_test::block_on(library_read(State(state.clone()), headers.clone(), Path(1)))
                .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/epub+zip"
        );
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "5");

        let Json(dashboard) =
            tokio_test::block_on(library_dashboard(State(state), headers)).unwrap();
        assert_eq!(dashboard.coins, 900);
        assert_eq!(dashboard.issued_books.len(), 1);
        assert_eq!(dashboard.total_fines, 0);
    }

    #[test]
    fn test_return_and_sync_fines_responses() {
        let (state, headers, clock) = state_with_clock();
        state.db.create_book(&Book::new(1, "Dune", "Frank Herbert")).unwrap();
        state.db.create_book(&Book::new(2, "Emma", "Jane Austen")).unwrap();

        for book_id in [1, 2] {
            tokio_test::block_on(library_issue(
                State(state.clone()),
                headers.clone(),
                Json(IssueRequest {
                    book_id,
                    book_title: None,
                }),
            ))
            .unwrap();
        }

        let Json(returned) = tokio_test::block_on(library_return(
            State(state.clone()),
            headers.clone(),
            Json(ReturnRequest { book_id: 1 }),
        ))
        .unwrap();
        assert_eq!(returned.message, "Book returned successfully!");
        assert_eq!(returned.coins, 800);
        assert_eq!(returned.issued_books.len(), 1);

        let err = tokio_test::block_on(library_return(
            State(state.clone()),
            headers.clone(),
            Json(ReturnRequest { book_id: 1 }),
        ))
        .unwrap_err();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = tokio_test::block_on(axum::body::to_bytes(response.into_body(), usize::MAX))
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["message"], "Active issue record not found.");

        // 40 days past due at 20 a day empties the 800 left.
        clock.advance_seconds(47 * 86_400);
        let Json(synced) =
            tokio_test::block_on(library_sync_fines(State(state.clone()), headers)).unwrap();
        assert_eq!(synced.message, ZERO_BALANCE_MESSAGE);
        assert_eq!(synced.coins, 0);
        assert!(synced.issued_books.is_empty());

        let json = serde_json::to_value(&synced).unwrap();
        assert_eq!(json["autoReturned"], true);
        assert_eq!(json["issuedBooks"], serde_json::json!([]));
    }

    #[test]
    fn test_admin_routes_reject_readers() {
        let (state, headers) = state_with_reader();
        let err = tokio_test::block_on(admin_users(State(state), headers)).unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_extract_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_token(&headers), None);

        headers.insert(header::AUTHORIZATION, "Bearer abc123".parse().unwrap());
        assert_eq!(extract_token(&headers), Some("abc123".to_string()));

        headers.insert(header::AUTHORIZATION, "Basic abc123".parse().unwrap());
        assert_eq!(extract_token(&headers), None);
    }

    #[test]
    fn test_mime_type() {
        assert_eq!(mime_type(std::path::Path::new("a/b.PDF")), "application/pdf");
        assert_eq!(mime_type(std::path::Path::new("b.epub")), "application/epub+zip");
        assert_eq!(mime_type(std::path::Path::new("noext")), "application/octet-stream");
    }

    #[test]
    fn test_book_request_overlays_fields() {
        let mut book = Book::new(1, "Old", "Someone");
        let req: BookRequest =
            serde_json::from_str(r#"{"title": " New ", "bookType": "PHYSICAL", "tags": ["a"]}"#)
                .unwrap();
        req.apply(&mut book);

        assert_eq!(book.title, "New");
        assert_eq!(book.author, "Someone");
        assert_eq!(book.book_type, BookType::Physical);
        assert_eq!(book.tags, vec!["a"]);
    }
}
