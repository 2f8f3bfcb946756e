use axum::Json;
use axum::extract::State;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::agent::TurnSnapshot;
use crate::server::AppState;
use crate::store::StoreHealth;
use crate::transcript::SinkHealth;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: i64,
    pub session_store: StoreHealth,
    pub transcript: SinkHealth,
    pub turns: TurnSnapshot,
}

/// Always answers 200; a failing dependency shows up as `degraded`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let orchestrator = &state.orchestrator;
    let (session_store, transcript) = tokio::join!(
        orchestrator.sessions().health(),
        orchestrator.transcripts().health()
    );

    let degraded = session_store.degraded
        || !session_store.reachable
        || (transcript.enabled && !transcript.reachable);
    let now = Utc::now();

    Json(HealthResponse {
        status: if degraded { "degraded" } else { "healthy" },
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        timestamp: now,
        uptime_secs: now.signed_duration_since(state.started_at).num_seconds(),
        session_store,
        transcript,
        turns: orchestrator.metrics().snapshot(),
    })
}
