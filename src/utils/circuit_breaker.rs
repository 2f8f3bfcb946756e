//! Circuit breaker for best-effort outbound calls
//!
//! After `failure_threshold` consecutive failures the breaker opens and callers skip the
//! remote call entirely until `cool_down` has elapsed. One probe call is then let through;
//! its outcome closes or re-opens the breaker.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Calls are skipped
    Open,
    /// A single probe call is in flight
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Circuit breaker guarding one external service
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    failure_threshold: u32,
    cool_down: Duration,
    service: &'static str,
}

impl CircuitBreaker {
    /// Create a closed breaker
    pub fn new(service: &'static str, failure_threshold: u32, cool_down: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
            failure_threshold: failure_threshold.max(1),
            cool_down,
            service,
        }
    }

    /// Returns true if the caller may attempt the remote call now
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => false,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|at| at.elapsed()).unwrap_or_default();
                if elapsed >= self.cool_down {
                    inner.state = CircuitState::HalfOpen;
                    debug!(service = self.service, "Circuit breaker half-open, probing");
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            debug!(service = self.service, "Circuit breaker closed");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        let should_open = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.consecutive_failures >= self.failure_threshold,
            CircuitState::Open => false,
        };

        if should_open {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            warn!(
                service = self.service,
                failures = inner.consecutive_failures,
                cool_down_ms = self.cool_down.as_millis() as u64,
                "Circuit breaker opened"
            );
        }
    }

    /// Current state
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // The guarded data stays consistent even if a holder panicked.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
