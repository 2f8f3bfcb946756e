//! HTTP request handlers

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::utils::ParleyError;

mod chat;
mod health;
mod info;
mod session;

pub use chat::{ChatBody, ChatResponse, chat};
pub use health::health;
pub use info::info;
pub use session::{delete_session, get_session};

/// `{"error": message}` with the given status
pub(crate) fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

impl IntoResponse for ParleyError {
    fn into_response(self) -> Response {
        match self {
            ParleyError::Validation { message } => error_body(StatusCode::BAD_REQUEST, message),
            ParleyError::SessionNotFound { .. } => {
                error_body(StatusCode::NOT_FOUND, "Session not found")
            }
            other => {
                tracing::error!(
                    error = %other,
                    recoverable = other.is_recoverable(),
                    "Request failed"
                );
                error_body(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }
}
