use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use parley_queue::QueueError;
use parley_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Bad or missing credential.  Always this exact message, whatever the
    /// underlying reason, so rejections reveal nothing about accounts.
    #[error("authentication failed")]
    Authentication,

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    /// Durable store unavailable; the send was aborted before any
    /// delivery attempt.
    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// Relay queue unavailable; the message is persisted but live
    /// delivery is degraded.
    #[error("Relay queue unavailable: {0}")]
    QueueUnavailable(#[from] QueueError),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Authentication => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::InvalidRecipient(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Persistence(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Storage error".to_string())
            }
            ServerError::QueueUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "Relay unavailable".to_string())
            }
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
