//! # error
//!
//! Centralised application error type.
//!
//! Handlers return `Result<_, AppError>` and Axum's `IntoResponse` impl turns
//! it into a `{ ok: false, error }` JSON body.  Inside the engine the same
//! type flows out of collaborator calls and is converted into `error` events
//! at the orchestration boundary, never into a crash.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// The request payload was syntactically correct but semantically invalid.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The requested resource (e.g. a position id) does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Chain bridge call failed (network, HTTP status, decode).
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// Chain bridge call did not answer within the configured timeout.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Snapshot attributes outside their documented range.
    #[error("Invalid position: {0}")]
    InvalidPosition(String),

    /// Catch-all for unexpected failures.
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Collaborator(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg.clone()),
            AppError::InvalidPosition(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::Internal(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Internal error: {err}"),
            ),
        };

        let body = Json(json!({
            "ok":    false,
            "error": message,
        }));

        (status, body).into_response()
    }
}
