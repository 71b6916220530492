//! Robohub server
//!
//! HTTP routes, the device WebSocket endpoint, and the shared
//! application state wiring the fleet components together.

pub mod http;
pub mod logs;
pub mod state;
pub mod ws;

pub use http::create_router;
pub use logs::{LogBuffer, LogEntry};
pub use state::AppState;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Server errors surfaced at the HTTP boundary.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<&ServerError> for StatusCode {
    fn from(err: &ServerError) -> Self {
        match err {
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = StatusCode::from(&self);
        // Internal detail stays in the logs, not in the body.
        let body = match &self {
            ServerError::Internal(detail) => {
                tracing::error!(error = %detail, "internal server error");
                serde_json::json!({"error": "internal error"})
            }
            other => serde_json::json!({"error": other.to_string()}),
        };
        (status, axum::Json(body)).into_response()
    }
}
