//! Per-session sliding-window admission control
//!
//! Windows live in the same backend as sessions and are keyed by session id. Pruning,
//! counting and recording happen in one atomic backend step, so concurrent requests for the
//! same id can never over- or under-admit.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::store::{FailoverBackend, StoreBackend};
use crate::utils::error::Result;

pub use crate::store::Admission;

pub struct RateLimiter {
    backend: Arc<FailoverBackend>,
    window: Duration,
    max_requests: u32,
}

impl RateLimiter {
    /// `max_requests == 0` disables limiting entirely
    pub fn new(backend: Arc<FailoverBackend>, window: Duration, max_requests: u32) -> Self {
        Self {
            backend,
            window,
            max_requests,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_requests > 0
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Counts this request against `session_id` if the window has room
    pub async fn check_and_increment(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Admission> {
        if !self.is_enabled() {
            return Ok(Admission::untracked());
        }

        let admission = self
            .backend
            .admit(session_id, now, self.window, self.max_requests)
            .await?;

        if admission.allowed {
            debug!(
                session_id = %session_id,
                in_window = admission.in_window,
                limit = self.max_requests,
                "Request admitted"
            );
        } else {
            info!(
                session_id = %session_id,
                limit = self.max_requests,
                window_secs = self.window.as_secs(),
                retry_after_ms = admission.retry_after.map(|d| d.as_millis() as u64),
                "rate_limited"
            );
        }
        Ok(admission)
    }
}
