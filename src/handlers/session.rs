use axum::Json;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::agent::HistoryEntry;
use crate::server::AppState;
use crate::utils::ParleyError;

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub history: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub last_interaction: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_hint: Option<String>,
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.orchestrator.sessions().get(&session_id).await {
        Ok(Some(session)) => Json(SessionResponse {
            session_id: session.id,
            history: session
                .history
                .iter()
                .map(|m| HistoryEntry::new(m.role, &m.content))
                .collect(),
            created_at: session.created_at,
            last_interaction: session.last_interaction_at,
            language_hint: session.language_hint.map(|l| l.code().to_string()),
        })
        .into_response(),
        Ok(None) => ParleyError::session_not_found(session_id).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.orchestrator.sessions().delete(&session_id).await {
        Ok(true) => Json(json!({ "message": "Session deleted successfully" })).into_response(),
        Ok(false) => ParleyError::session_not_found(session_id).into_response(),
        Err(e) => e.into_response(),
    }
}
