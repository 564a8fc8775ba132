//! HTTP server and routes.

mod handlers;
mod state;

pub use state::AppState;

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/login", post(handlers::auth_login))
        .route("/register", post(handlers::auth_register))
        .route("/logout", post(handlers::auth_logout))
        .route("/me", get(handlers::auth_me));

    let book_routes = Router::new()
        .route("/", get(handlers::books_list))
        .route("/search", get(handlers::books_search))
        .route("/{id}", get(handlers::book_get));

    let library_routes = Router::new()
        .route("/issue", post(handlers::library_issue))
        .route("/return", post(handlers::library_return))
        .route("/sync-fines", post(handlers::library_sync_fines))
        .route("/dashboard", get(handlers::library_dashboard))
        .route("/add-coins", post(handlers::payment_create))
        .route("/read/{book_id}", get(handlers::library_read))
        .route("/progress", post(handlers::progress_save))
        .route("/progress/{book_id}", get(handlers::progress_get));

    let payment_routes = Router::new()
        .route("/create", post(handlers::payment_create))
        .route("/my-history", get(handlers::payment_history))
        .route("/all", get(handlers::payment_all));

    let highlight_routes = Router::new()
        .route("/", post(handlers::highlight_create))
        // GET takes a book ID, PUT and DELETE a highlight ID.
        .route(
            "/{id}",
            get(handlers::highlights_get)
                .put(handlers::highlight_update)
                .delete(handlers::highlight_delete),
        );

    let review_routes = Router::new()
        .route("/", post(handlers::review_create))
        .route("/{book_id}", get(handlers::reviews_get));

    let admin_routes = Router::new()
        .route("/users", get(handlers::admin_users))
        .route("/users/{id}/block", put(handlers::admin_block_user))
        .route("/payments", get(handlers::payment_all))
        .route("/books", post(handlers::admin_book_create))
        .route(
            "/books/{id}",
            put(handlers::admin_book_update).delete(handlers::admin_book_delete),
        )
        .route("/reviews", get(handlers::admin_reviews))
        .route("/reviews/{id}", delete(handlers::admin_review_delete));

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/books", book_routes)
        .nest("/api/library", library_routes)
        .nest("/api/payment", payment_routes)
        .nest("/api/highlights", highlight_routes)
        .nest("/api/reviews", review_routes)
        .route("/api/notifications", get(handlers::notifications_list))
        .nest("/api/admin", admin_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
