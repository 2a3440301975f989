//! Error types for Fedibox
//!
//! All errors in the application are converted to `AppError`,
//! which implements `IntoResponse` so the inbox route can turn a fatal
//! processing failure into a delivery-failure response for the remote peer.
//!
//! Non-fatal conditions (unsupported types, duplicates, unknown entities for
//! most activity types) are not errors; see
//! [`DropReason`](crate::federation::DropReason).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Application-wide error type
#[derive(Debug, Error)]
pub enum AppError {
    /// Required structural field missing or of the wrong shape (400)
    #[error("Malformed activity: {0}")]
    MalformedActivity(String),

    /// `actor`/`object` reference does not parse as an absolute URI (400)
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Referenced actor/object is not resolvable (404)
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    /// Activity actor does not own the object being mutated (403)
    #[error("Actor {actor} is not the owner ({owner}) of the target")]
    AuthorizationMismatch { actor: String, owner: String },

    /// Network or parse failure retrieving a remote document (502)
    #[error("Remote fetch failed: {0}")]
    RemoteFetch(String),

    /// Validation error (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Access denied (403)
    #[error("Access denied")]
    Forbidden,

    /// Database error (500)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP client error (502)
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Federation error (502)
    #[error("Federation error: {0}")]
    Federation(String),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Encryption/decryption error (500)
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl AppError {
    /// Short machine-readable label, used for metrics and response bodies
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::MalformedActivity(_) => "malformed_activity",
            AppError::InvalidIdentifier(_) => "invalid_identifier",
            AppError::UnknownEntity(_) => "unknown_entity",
            AppError::AuthorizationMismatch { .. } => "authorization_mismatch",
            AppError::RemoteFetch(_) => "remote_fetch",
            AppError::Validation(_) => "validation",
            AppError::Forbidden => "forbidden",
            AppError::Database(_) => "database",
            AppError::HttpClient(_) => "http_client",
            AppError::Federation(_) => "federation",
            AppError::Config(_) => "config",
            AppError::Encryption(_) => "encryption",
            AppError::Internal(_) => "internal",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::MalformedActivity(_)
            | AppError::InvalidIdentifier(_)
            | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::UnknownEntity(_) => StatusCode::NOT_FOUND,
            AppError::AuthorizationMismatch { .. } | AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::RemoteFetch(_) | AppError::HttpClient(_) | AppError::Federation(_) => {
                StatusCode::BAD_GATEWAY
            }
            AppError::Database(_)
            | AppError::Config(_)
            | AppError::Encryption(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        use axum::Json;

        let status = self.status_code();
        let error_type = self.kind();

        // Storage and internal details stay in the logs.
        let error_message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Internal error while handling request");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        use crate::metrics::ERRORS_TOTAL;
        ERRORS_TOTAL.with_label_values(&[error_type]).inc();

        let body = Json(serde_json::json!({
            "error": error_message,
            "type": error_type,
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
