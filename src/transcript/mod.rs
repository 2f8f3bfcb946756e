//! Optional archive of visitor conversations
//!
//! A `TranscriptSink` receives one entry per message. The orchestrator talks to it through
//! `TranscriptRecorder`, which bounds each append with a timeout and swallows failures so the
//! archive can never affect a visitor's reply.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::session::{Language, Message, Role};

pub mod file;
pub mod webhook;

pub use file::JsonlFileSink;
pub use webhook::WebhookSink;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Transcript IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Transcript encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Transcript endpoint error: {message}")]
    Remote { message: String },

    #[error("Transcript append timed out after {millis}ms")]
    Timeout { millis: u64 },
}

/// One archived message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub session_id: String,
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_hint: Option<Language>,
    pub rate_limited: bool,
    pub created_at: DateTime<Utc>,
}

impl TranscriptEntry {
    pub fn from_message(
        session_id: &str,
        message: &Message,
        language_hint: Option<Language>,
        rate_limited: bool,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            role: message.role,
            content: message.content.clone(),
            language_hint,
            rate_limited,
            created_at: message.timestamp,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SinkHealth {
    pub backend: &'static str,
    pub enabled: bool,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[async_trait]
pub trait TranscriptSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn append(&self, entry: &TranscriptEntry) -> Result<(), SinkError>;

    async fn health(&self) -> SinkHealth;
}

/// Sink used when archiving is switched off
#[derive(Debug, Default)]
pub struct DisabledSink;

#[async_trait]
impl TranscriptSink for DisabledSink {
    fn name(&self) -> &'static str {
        "disabled"
    }

    async fn append(&self, _entry: &TranscriptEntry) -> Result<(), SinkError> {
        Ok(())
    }

    async fn health(&self) -> SinkHealth {
        SinkHealth {
            backend: self.name(),
            enabled: false,
            reachable: true,
            error: None,
        }
    }
}

/// Timeout-bounded, failure-swallowing front for a sink
pub struct TranscriptRecorder {
    sink: Arc<dyn TranscriptSink>,
    timeout: Duration,
}

impl TranscriptRecorder {
    pub fn new(sink: Arc<dyn TranscriptSink>, timeout: Duration) -> Self {
        Self { sink, timeout }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(DisabledSink), Duration::from_secs(1))
    }

    /// Archives the visitor message and the reply. Returns how many entries were stored.
    pub async fn record_turn(
        &self,
        session_id: &str,
        user: &Message,
        assistant: &Message,
        language_hint: Option<Language>,
        rate_limited: bool,
    ) -> usize {
        let mut stored = 0;
        for message in [user, assistant] {
            let entry =
                TranscriptEntry::from_message(session_id, message, language_hint, rate_limited);
            if self.append(&entry).await {
                stored += 1;
            }
        }
        stored
    }

    async fn append(&self, entry: &TranscriptEntry) -> bool {
        let outcome = tokio::time::timeout(self.timeout, self.sink.append(entry))
            .await
            .unwrap_or(Err(SinkError::Timeout {
                millis: self.timeout.as_millis() as u64,
            }));

        match outcome {
            Ok(()) => {
                debug!(
                    session_id = %entry.session_id,
                    role = entry.role.as_str(),
                    sink = self.sink.name(),
                    "Transcript entry stored"
                );
                true
            }
            Err(e) => {
                warn!(
                    session_id = %entry.session_id,
                    sink = self.sink.name(),
                    error = %e,
                    "transcript_error"
                );
                false
            }
        }
    }

    pub async fn health(&self) -> SinkHealth {
        self.sink.health().await
    }
}
