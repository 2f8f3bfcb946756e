//! HTTP server: wiring, routes and lifecycle
//!
//! `run_server` builds every component from the configuration, serves the router, and on
//! SIGTERM/SIGINT stops the sweep task and clears in-process state before returning.

use anyhow::{Context, Result};
use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::agent::{
    ContextBuilder, ConversationOrchestrator, OrchestratorConfig, Persona, ToolDispatcher,
};
use crate::config::Config;
use crate::handlers;
use crate::notify::{BestEffortNotifier, PushoverNotifier};
use crate::providers::openai::DEFAULT_BASE_URL;
use crate::providers::{LlmProvider, OpenAiProvider};
use crate::ratelimit::RateLimiter;
use crate::session::{SessionStore, SessionSweeper};
use crate::store::{FailoverBackend, MemoryBackend, RedisBackend};
use crate::transcript::{JsonlFileSink, TranscriptRecorder, TranscriptSink, WebhookSink};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ConversationOrchestrator>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(orchestrator: Arc<ConversationOrchestrator>) -> Self {
        Self {
            orchestrator,
            started_at: Utc::now(),
        }
    }
}

fn routes() -> Router<AppState> {
    Router::new()
        .route("/chat", post(handlers::chat))
        .route(
            "/session/{session_id}",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route("/health", get(handlers::health))
        .route("/info", get(handlers::info))
}

/// Routes at the root, mirrored under `/api`
pub fn build_app(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .merge(routes())
        .nest("/api", routes())
        .with_state(state)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Redis-backed store when configured and reachable, in-process otherwise
async fn build_backend(config: &Config) -> Arc<FailoverBackend> {
    let fallback = Arc::new(MemoryBackend::new());

    let Some(url) = config.session.redis_url.as_deref() else {
        info!(backend = "memory", "session_store_ready");
        return Arc::new(FailoverBackend::memory_only(fallback));
    };

    match RedisBackend::connect(
        url,
        config.session.redis_prefix.clone(),
        config.session.redis_timeout(),
    )
    .await
    {
        Ok(redis) => {
            info!(backend = "redis", "session_store_ready");
            Arc::new(FailoverBackend::new(Arc::new(redis), fallback))
        }
        Err(e) => {
            warn!(error = %e, backend = "memory", "session_store_fallback");
            Arc::new(FailoverBackend::degraded_from_start(fallback, e.to_string()))
        }
    }
}

fn build_provider(config: &Config) -> Result<Arc<dyn LlmProvider>> {
    let api_key = config.model.api_key.clone().unwrap_or_default();
    if api_key.is_empty() {
        warn!("OPENAI_API_KEY is not set; every turn will end in the fallback reply");
    }
    let provider = OpenAiProvider::try_new(
        api_key,
        config
            .model
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        config.model.model.clone(),
        config.model.request_timeout(),
        config.model.max_retries,
    )
    .context("Failed to create model provider")?;
    Ok(Arc::new(provider))
}

fn build_notifier(config: &Config) -> Result<Arc<BestEffortNotifier>> {
    let Some((token, user)) = config.notifier.pushover_credentials() else {
        info!("Pushover credentials missing; notifications disabled");
        return Ok(Arc::new(BestEffortNotifier::disabled()));
    };
    let pushover = PushoverNotifier::try_new(token, user, config.notifier.timeout())
        .context("Failed to create Pushover notifier")?;
    Ok(Arc::new(BestEffortNotifier::new(
        Arc::new(pushover),
        config.notifier.timeout(),
    )))
}

async fn build_transcripts(config: &Config) -> Result<Arc<TranscriptRecorder>> {
    let transcript = &config.transcript;
    let sink: Arc<dyn TranscriptSink> = if let Some(url) = transcript.webhook_url.as_deref() {
        Arc::new(
            WebhookSink::try_new(url, transcript.timeout())
                .context("Failed to create transcript webhook")?,
        )
    } else if let Some(path) = transcript.path.clone() {
        Arc::new(
            JsonlFileSink::open(path)
                .await
                .context("Failed to open transcript file")?,
        )
    } else {
        return Ok(Arc::new(TranscriptRecorder::disabled()));
    };
    info!(sink = sink.name(), "Transcript archiving enabled");
    Ok(Arc::new(TranscriptRecorder::new(sink, transcript.timeout())))
}

/// Everything `run_server` needs besides the listener
pub struct Services {
    pub state: AppState,
    pub sessions: Arc<SessionStore>,
    pub sweeper: SessionSweeper,
}

pub async fn build_services(config: &Config) -> Result<Services> {
    let backend = build_backend(config).await;
    let ttl = config.session.ttl();
    let sessions = Arc::new(SessionStore::new(Arc::clone(&backend), ttl));
    let limiter = Arc::new(RateLimiter::new(
        Arc::clone(&backend),
        config.rate_limit.window(),
        config.rate_limit.max_requests,
    ));
    let sweeper = SessionSweeper::new(
        backend,
        ttl,
        config.rate_limit.window(),
        config.session.sweep_interval(),
    );

    let persona = Persona::load(
        config.persona.name.clone(),
        config.persona.summary_path.as_deref(),
        config.persona.profile_path.as_deref(),
    )
    .await
    .context("Failed to load persona texts")?;

    let tools = Arc::new(ToolDispatcher::with_default_tools(build_notifier(config)?));
    let orchestrator = ConversationOrchestrator::new(
        Arc::clone(&sessions),
        limiter,
        tools,
        build_provider(config)?,
        ContextBuilder::new(Arc::new(persona)),
        OrchestratorConfig {
            model: Some(config.model.model.clone()),
            model_timeout: config.model.call_budget(),
            turn_timeout: config.turn_budget(),
            max_tool_rounds: config.model.max_tool_rounds,
            max_message_chars: config.model.max_message_chars,
        },
    )
    .with_transcripts(build_transcripts(config).await?);

    Ok(Services {
        state: AppState::new(Arc::new(orchestrator)),
        sessions,
        sweeper,
    })
}

pub async fn run_server(config: Config) -> Result<()> {
    let summary = config.get_safe_summary();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %summary.bind,
        model = %summary.model,
        rate_limit = %summary.rate_limit,
        session_ttl_secs = summary.session_ttl_secs,
        notifier_configured = summary.notifier_configured,
        transcript = summary.transcript_backend,
        "Starting parley server"
    );

    let Services {
        state,
        sessions,
        sweeper,
    } = build_services(&config).await?;
    let (sweeper_handle, sweeper_shutdown) = sweeper.start();

    let app = build_app(state, config.server.request_timeout());
    let bind = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!(addr = %bind, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Starting graceful shutdown sequence...");
    let _ = sweeper_shutdown.send(()).await;
    if let Err(e) = sweeper_handle.await {
        warn!(error = %e, "Session sweeper task ended abnormally");
    }
    if let Err(e) = sessions.clear().await {
        warn!(error = %e, "Failed to clear session store");
    }
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
