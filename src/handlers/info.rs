use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub name: String,
    pub description: String,
    pub service: &'static str,
    pub version: &'static str,
    pub capabilities: [&'static str; 3],
    pub tools: Vec<String>,
}

pub async fn info(State(state): State<AppState>) -> Json<InfoResponse> {
    let name = state.orchestrator.persona_name().to_string();
    Json(InfoResponse {
        description: format!("AI-powered chatbot representing {}", name),
        name,
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        capabilities: [
            "Answer questions about background and experience",
            "Capture lead information",
            "Record unanswered questions",
        ],
        tools: state
            .orchestrator
            .tools()
            .names()
            .into_iter()
            .map(str::to_string)
            .collect(),
    })
}
