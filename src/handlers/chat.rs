use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::{HistoryEntry, TurnRequest};
use crate::handlers::error_body;
use crate::server::AppState;
use crate::utils::ParleyError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub history: Option<Vec<HistoryEntry>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub message: String,
    pub rate_limited: bool,
    pub timestamp: DateTime<Utc>,
}

pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatBody>, JsonRejection>,
) -> Response {
    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) => {
            tracing::debug!(error = %rejection.body_text(), "Rejected chat body");
            return error_body(rejection.status(), "Message is required");
        }
    };

    let Some(message) = body.message else {
        return ParleyError::validation("Message is required").into_response();
    };

    let request = TurnRequest {
        session_id: body.session_id,
        message,
        history: body.history,
    };

    match state.orchestrator.handle_turn(request).await {
        Ok(reply) => Json(ChatResponse {
            session_id: reply.session_id,
            message: reply.message,
            rate_limited: reply.rate_limited,
            timestamp: reply.timestamp,
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}
