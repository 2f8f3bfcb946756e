//! Common test utilities.

#![allow(dead_code)]

use axum::Router;
use std::sync::Arc;
use std::time::Duration;

use parley::agent::{
    ContextBuilder, ConversationOrchestrator, OrchestratorConfig, Persona, ToolDispatcher,
};
use parley::notify::BestEffortNotifier;
use parley::providers::mock::ScriptedProvider;
use parley::ratelimit::RateLimiter;
use parley::server::{self, AppState};
use parley::session::SessionStore;

pub struct TestApp {
    pub router: Router,
    pub provider: Arc<ScriptedProvider>,
    pub sessions: Arc<SessionStore>,
}

/// App on in-process stores, a disabled notifier and the given scripted model
pub fn test_app_with(
    provider: ScriptedProvider,
    max_requests: u32,
    config: OrchestratorConfig,
) -> TestApp {
    test_app_timed(provider, max_requests, config, Duration::from_secs(30))
}

/// Same as `test_app_with`, with the HTTP request timeout set explicitly
pub fn test_app_timed(
    provider: ScriptedProvider,
    max_requests: u32,
    config: OrchestratorConfig,
    request_timeout: Duration,
) -> TestApp {
    let sessions = Arc::new(SessionStore::in_memory(Duration::from_secs(3600)));
    let limiter = Arc::new(RateLimiter::new(
        sessions.backend(),
        Duration::from_secs(60),
        max_requests,
    ));
    let tools = Arc::new(ToolDispatcher::with_default_tools(Arc::new(
        BestEffortNotifier::disabled(),
    )));
    let provider = Arc::new(provider);
    let orchestrator = ConversationOrchestrator::new(
        Arc::clone(&sessions),
        limiter,
        tools,
        provider.clone(),
        ContextBuilder::new(Arc::new(Persona::new("Test Owner", "Summary", "Profile"))),
        config,
    );

    TestApp {
        router: server::build_app(AppState::new(Arc::new(orchestrator)), request_timeout),
        provider,
        sessions,
    }
}

pub fn test_app() -> TestApp {
    test_app_with(
        ScriptedProvider::replying("Hello! Happy to help."),
        8,
        OrchestratorConfig::default(),
    )
}
