//! Outbound operator notifications
//!
//! Tools report leads and unanswered questions through a `Notifier`. Delivery is strictly
//! best-effort: `BestEffortNotifier` bounds each call with a timeout, trips a circuit breaker
//! after repeated failures, and turns every failure into a log line.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::utils::CircuitBreaker;

pub mod pushover;

pub use pushover::PushoverNotifier;

/// Consecutive failures before notifications are paused
const BREAKER_THRESHOLD: u32 = 3;
/// Pause after the breaker opens
const BREAKER_COOL_DOWN: Duration = Duration::from_secs(60);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotifyError {
    #[error("Notifier network error: {message}")]
    Network { message: String },

    #[error("Notifier rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Notifier timed out after {millis}ms")]
    Timeout { millis: u64 },
}

impl NotifyError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }
}

/// Sink for operator notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    /// False when the notifier has no credentials and every call would be a no-op
    fn is_enabled(&self) -> bool {
        true
    }

    /// Sends one event. `payload["message"]` carries the human-readable text.
    async fn notify(&self, event_type: &str, payload: &Value) -> Result<(), NotifyError>;
}

/// Notifier used when no credentials are configured
#[derive(Debug, Default)]
pub struct DisabledNotifier;

#[async_trait]
impl Notifier for DisabledNotifier {
    fn name(&self) -> &'static str {
        "disabled"
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn notify(&self, _event_type: &str, _payload: &Value) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// What happened to one notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Skipped,
    Failed,
}

/// Timeout- and breaker-guarded wrapper that never returns an error
pub struct BestEffortNotifier {
    inner: Arc<dyn Notifier>,
    timeout: Duration,
    breaker: CircuitBreaker,
}

impl BestEffortNotifier {
    pub fn new(inner: Arc<dyn Notifier>, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            breaker: CircuitBreaker::new("notifier", BREAKER_THRESHOLD, BREAKER_COOL_DOWN),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(DisabledNotifier), Duration::from_secs(1))
    }

    pub async fn deliver(&self, event_type: &str, payload: &Value) -> Delivery {
        if !self.inner.is_enabled() {
            debug!(event_type = event_type, "notifier_skipped: no credentials configured");
            return Delivery::Skipped;
        }
        if !self.breaker.try_acquire() {
            warn!(
                event_type = event_type,
                notifier = self.inner.name(),
                "notifier_skipped: circuit open"
            );
            return Delivery::Skipped;
        }

        let outcome = tokio::time::timeout(self.timeout, self.inner.notify(event_type, payload))
            .await
            .unwrap_or(Err(NotifyError::Timeout {
                millis: self.timeout.as_millis() as u64,
            }));

        match outcome {
            Ok(()) => {
                self.breaker.record_success();
                info!(
                    event_type = event_type,
                    notifier = self.inner.name(),
                    "notifier_delivered"
                );
                Delivery::Delivered
            }
            Err(e) => {
                self.breaker.record_failure();
                warn!(
                    event_type = event_type,
                    notifier = self.inner.name(),
                    error = %e,
                    "notifier_error"
                );
                Delivery::Failed
            }
        }
    }
}
