use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Main error type for the application.
#[derive(Error, Debug)]
pub enum AppError {
    /// The user already holds an active issue for this book.
    #[error("You have already issued this book.")]
    DuplicateIssue,

    /// Wallet balance is below the issuance cost.
    #[error("Insufficient coins! Please buy more.")]
    InsufficientBalance,

    /// Physical copy is out on loan.
    #[error("Book is currently unavailable")]
    Unavailable,

    /// Catalog has no book with this ID.
    #[error("Book not found")]
    BookNotFound,

    /// No issued/overdue record exists for the user and book.
    #[error("Active issue record not found.")]
    NoActiveIssue,

    /// User account does not exist.
    #[error("User not found")]
    UserNotFound,

    /// Other resource not found.
    #[error("{0}")]
    NotFound(String),

    /// Malformed or rejected request input.
    #[error("{0}")]
    InvalidInput(String),

    /// Missing or invalid credentials.
    #[error("{0}")]
    Unauthorized(String),

    /// Authenticated but not allowed.
    #[error("{0}")]
    Forbidden(String),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::DuplicateIssue
            | AppError::InsufficientBalance
            | AppError::Unavailable
            | AppError::NoActiveIssue
            | AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::BookNotFound | AppError::UserNotFound | AppError::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Io(_) | AppError::Config(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Store and I/O details stay in the log.
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "Request error");
            "Server error".to_string()
        } else {
            tracing::debug!(error = %self, status = %status, "Request rejected");
            self.to_string()
        };

        (status, Json(serde_json::json!({ "message": message }))).into_response()
    }
}

/// Result type alias for the application.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_errors_are_client_errors() {
        for err in [
            AppError::DuplicateIssue,
            AppError::InsufficientBalance,
            AppError::Unavailable,
            AppError::NoActiveIssue,
        ] {
            assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        }
        assert_eq!(AppError::BookNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::UserNotFound.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_internal_error_hides_details() {
        let response = AppError::Internal("disk on fire".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
