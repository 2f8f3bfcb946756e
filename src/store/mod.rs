//! Keyed, TTL-aware storage shared by sessions and rate windows
//!
//! `StoreBackend` is the strategy seam: an in-process map (`MemoryBackend`) or Redis
//! (`RedisBackend`). `FailoverBackend` wraps the configured primary and reroutes every call to
//! the in-process map once the primary fails, so callers never see a storage outage.
//!
//! Every operation on a single key is atomic in every backend. Operations on different keys
//! never contend on a shared lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::session::{Language, Message, Session};

pub mod memory;
pub mod redis;

pub use memory::MemoryBackend;
pub use self::redis::RedisBackend;

/// Errors raised by a storage backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Backend could not be reached or rejected the command
    #[error("{backend} store unavailable: {message}")]
    Unavailable {
        backend: &'static str,
        message: String,
    },

    /// Backend did not answer in time
    #[error("{backend} store timed out after {millis}ms during {operation}")]
    Timeout {
        backend: &'static str,
        operation: &'static str,
        millis: u64,
    },

    /// Stored data could not be decoded
    #[error("Corrupt stored data: {message}")]
    Corrupt { message: String },
}

impl StoreError {
    pub fn unavailable(backend: &'static str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            backend,
            message: message.into(),
        }
    }

    pub fn timeout(backend: &'static str, operation: &'static str, after: Duration) -> Self {
        Self::Timeout {
            backend,
            operation,
            millis: after.as_millis() as u64,
        }
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }

    /// True when the backend itself is unreachable or too slow, as opposed to bad data
    pub fn is_outage(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result of one sliding-window admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    /// Time until the oldest counted request leaves the window; set only on denial
    pub retry_after: Option<Duration>,
    /// Requests counted in the window after this check
    pub in_window: u32,
}

impl Admission {
    pub fn admitted(in_window: u32) -> Self {
        Self {
            allowed: true,
            retry_after: None,
            in_window,
        }
    }

    pub fn denied(retry_after: Duration, in_window: u32) -> Self {
        Self {
            allowed: false,
            retry_after: Some(retry_after),
            in_window,
        }
    }

    /// Admission from a limiter that is switched off
    pub fn untracked() -> Self {
        Self::admitted(0)
    }
}

/// Health snapshot of the storage layer
#[derive(Debug, Clone, Serialize)]
pub struct StoreHealth {
    pub backend: &'static str,
    pub reachable: bool,
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_sessions: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Storage strategy for sessions and rate windows
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Short backend name for logs and health output
    fn name(&self) -> &'static str;

    /// Stores a brand-new session, replacing nothing
    async fn insert_session(&self, session: &Session, ttl: Duration) -> StoreResult<()>;

    /// Loads a session unless it is unknown or idle for `ttl` or longer at `now`
    async fn load_session(
        &self,
        id: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> StoreResult<Option<Session>>;

    /// Appends the pair in order and slides the expiry. Returns false if the session is absent.
    async fn append_turn(
        &self,
        id: &str,
        user: &Message,
        assistant: &Message,
        language: Option<Language>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> StoreResult<bool>;

    /// Slides the expiry without appending. Returns false if the session is absent.
    async fn touch(&self, id: &str, now: DateTime<Utc>, ttl: Duration) -> StoreResult<bool>;

    /// Removes the session and its rate window. Returns true only if a live session was removed;
    /// a record already idle past `ttl` is dropped but reported as absent.
    async fn remove(&self, id: &str, now: DateTime<Utc>, ttl: Duration) -> StoreResult<bool>;

    /// Prunes the window for `key`, then admits and records `now` if fewer than `max` remain
    async fn admit(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
        max: u32,
    ) -> StoreResult<Admission>;

    /// Physically drops expired sessions and empty windows, returning the sessions removed
    async fn purge_expired(
        &self,
        now: DateTime<Utc>,
        ttl: Duration,
        window: Duration,
    ) -> StoreResult<usize>;

    /// Number of live sessions when the backend can count them cheaply
    async fn session_count(&self) -> StoreResult<Option<usize>>;

    /// Round-trip check
    async fn ping(&self) -> StoreResult<()>;

    /// Drops all process-local state
    async fn clear(&self) -> StoreResult<()>;
}

/// Primary backend with sticky failover to the in-process map
///
/// Once the primary fails, the store stays on the in-process map for the rest of the process
/// lifetime so a flapping primary cannot split a visitor's state across two backends.
pub struct FailoverBackend {
    primary: Option<Arc<dyn StoreBackend>>,
    fallback: Arc<MemoryBackend>,
    degraded: AtomicBool,
    degraded_reason: std::sync::Mutex<Option<String>>,
}

impl FailoverBackend {
    /// In-process only; not degraded
    pub fn memory_only(fallback: Arc<MemoryBackend>) -> Self {
        Self {
            primary: None,
            fallback,
            degraded: AtomicBool::new(false),
            degraded_reason: std::sync::Mutex::new(None),
        }
    }

    /// External primary with in-process fallback
    pub fn new(primary: Arc<dyn StoreBackend>, fallback: Arc<MemoryBackend>) -> Self {
        Self {
            primary: Some(primary),
            fallback,
            degraded: AtomicBool::new(false),
            degraded_reason: std::sync::Mutex::new(None),
        }
    }

    /// An external store was requested but could not be reached at startup
    pub fn degraded_from_start(fallback: Arc<MemoryBackend>, reason: impl Into<String>) -> Self {
        let backend = Self::memory_only(fallback);
        backend.degraded.store(true, Ordering::SeqCst);
        backend.set_reason(reason.into());
        backend
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Primary to try, if one is configured and has not failed yet
    fn live_primary(&self) -> Option<&Arc<dyn StoreBackend>> {
        if self.is_degraded() {
            None
        } else {
            self.primary.as_ref()
        }
    }

    fn trip(&self, backend: &'static str, operation: &'static str, error: &StoreError) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            self.set_reason(error.to_string());
            warn!(
                backend = backend,
                operation = operation,
                error = %error,
                "store_degraded: falling back to in-memory session store"
            );
        }
    }

    /// Outages trip the failover and let the caller continue on the fallback; any other error
    /// is handed back without leaving the primary
    fn absorb(
        &self,
        backend: &'static str,
        operation: &'static str,
        error: StoreError,
    ) -> StoreResult<()> {
        if error.is_outage() {
            self.trip(backend, operation, &error);
            Ok(())
        } else {
            Err(error)
        }
    }

    fn set_reason(&self, reason: String) {
        let mut slot = self
            .degraded_reason
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(reason);
    }

    fn reason(&self) -> Option<String> {
        self.degraded_reason
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Health of whichever backend currently serves requests
    pub async fn health(&self) -> StoreHealth {
        if let Some(primary) = self.live_primary() {
            match primary.ping().await {
                Ok(()) => {
                    return StoreHealth {
                        backend: primary.name(),
                        reachable: true,
                        degraded: false,
                        active_sessions: primary.session_count().await.ok().flatten(),
                        error: None,
                    };
                }
                Err(e) if e.is_outage() => self.trip(primary.name(), "ping", &e),
                Err(e) => {
                    return StoreHealth {
                        backend: primary.name(),
                        reachable: true,
                        degraded: false,
                        active_sessions: None,
                        error: Some(e.to_string()),
                    };
                }
            }
        }

        StoreHealth {
            backend: self.fallback.name(),
            reachable: true,
            degraded: self.is_degraded(),
            active_sessions: self.fallback.session_count().await.ok().flatten(),
            error: self.reason(),
        }
    }
}

#[async_trait]
impl StoreBackend for FailoverBackend {
    fn name(&self) -> &'static str {
        match self.live_primary() {
            Some(primary) => primary.name(),
            None => self.fallback.name(),
        }
    }

    async fn insert_session(&self, session: &Session, ttl: Duration) -> StoreResult<()> {
        if let Some(primary) = self.live_primary() {
            match primary.insert_session(session, ttl).await {
                Ok(()) => return Ok(()),
                Err(e) => self.absorb(primary.name(), "insert_session", e)?,
            }
        }
        self.fallback.insert_session(session, ttl).await
    }

    async fn load_session(
        &self,
        id: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> StoreResult<Option<Session>> {
        if let Some(primary) = self.live_primary() {
            match primary.load_session(id, now, ttl).await {
                Ok(found) => return Ok(found),
                Err(e @ StoreError::Corrupt { .. }) => {
                    warn!(
                        session_id = %id,
                        backend = primary.name(),
                        error = %e,
                        "store_corrupt_record: dropping unreadable session"
                    );
                    if let Err(remove_err) = primary.remove(id, now, ttl).await {
                        self.absorb(primary.name(), "remove", remove_err)?;
                    }
                    return Ok(None);
                }
                Err(e) => self.absorb(primary.name(), "load_session", e)?,
            }
        }
        self.fallback.load_session(id, now, ttl).await
    }

    async fn append_turn(
        &self,
        id: &str,
        user: &Message,
        assistant: &Message,
        language: Option<Language>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> StoreResult<bool> {
        if let Some(primary) = self.live_primary() {
            match primary
                .append_turn(id, user, assistant, language, now, ttl)
                .await
            {
                Ok(appended) => return Ok(appended),
                Err(e) => self.absorb(primary.name(), "append_turn", e)?,
            }
        }
        self.fallback
            .append_turn(id, user, assistant, language, now, ttl)
            .await
    }

    async fn touch(&self, id: &str, now: DateTime<Utc>, ttl: Duration) -> StoreResult<bool> {
        if let Some(primary) = self.live_primary() {
            match primary.touch(id, now, ttl).await {
                Ok(touched) => return Ok(touched),
                Err(e) => self.absorb(primary.name(), "touch", e)?,
            }
        }
        self.fallback.touch(id, now, ttl).await
    }

    async fn remove(&self, id: &str, now: DateTime<Utc>, ttl: Duration) -> StoreResult<bool> {
        if let Some(primary) = self.live_primary() {
            match primary.remove(id, now, ttl).await {
                Ok(removed) => return Ok(removed),
                Err(e) => self.absorb(primary.name(), "remove", e)?,
            }
        }
        self.fallback.remove(id, now, ttl).await
    }

    async fn admit(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
        max: u32,
    ) -> StoreResult<Admission> {
        if let Some(primary) = self.live_primary() {
            match primary.admit(key, now, window, max).await {
                Ok(admission) => return Ok(admission),
                Err(e @ StoreError::Corrupt { .. }) => {
                    // Counted in-process for this call only; the primary stays in charge
                    warn!(
                        key = %key,
                        backend = primary.name(),
                        error = %e,
                        "store_corrupt_record: unreadable rate window reply"
                    );
                    return self.fallback.admit(key, now, window, max).await;
                }
                Err(e) => self.absorb(primary.name(), "admit", e)?,
            }
        }
        self.fallback.admit(key, now, window, max).await
    }

    async fn purge_expired(
        &self,
        now: DateTime<Utc>,
        ttl: Duration,
        window: Duration,
    ) -> StoreResult<usize> {
        let mut purged = self.fallback.purge_expired(now, ttl, window).await?;
        if let Some(primary) = self.live_primary() {
            match primary.purge_expired(now, ttl, window).await {
                Ok(n) => purged += n,
                Err(e) => self.absorb(primary.name(), "purge_expired", e)?,
            }
        }
        Ok(purged)
    }

    async fn session_count(&self) -> StoreResult<Option<usize>> {
        if let Some(primary) = self.live_primary() {
            match primary.session_count().await {
                Ok(count) => return Ok(count),
                Err(e) => self.absorb(primary.name(), "session_count", e)?,
            }
        }
        self.fallback.session_count().await
    }

    async fn ping(&self) -> StoreResult<()> {
        if let Some(primary) = self.live_primary() {
            match primary.ping().await {
                Ok(()) => return Ok(()),
                Err(e) => self.absorb(primary.name(), "ping", e)?,
            }
        }
        self.fallback.ping().await
    }

    async fn clear(&self) -> StoreResult<()> {
        info!(backend = self.name(), "Clearing in-process session state");
        self.fallback.clear().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Primary that fails every call with the same error
    struct BrokenBackend {
        error: StoreError,
        removals: AtomicUsize,
    }

    impl BrokenBackend {
        fn down() -> Self {
            Self::failing_with(StoreError::unavailable("broken", "down"))
        }

        fn corrupt() -> Self {
            Self::failing_with(StoreError::corrupt("expected value at line 1 column 1"))
        }

        fn failing_with(error: StoreError) -> Self {
            Self {
                error,
                removals: AtomicUsize::new(0),
            }
        }

        fn fail<T>(&self) -> StoreResult<T> {
            Err(self.error.clone())
        }
    }

    #[async_trait]
    impl StoreBackend for BrokenBackend {
        fn name(&self) -> &'static str {
            "broken"
        }
        async fn insert_session(&self, _: &Session, _: Duration) -> StoreResult<()> {
            self.fail()
        }
        async fn load_session(
            &self,
            _: &str,
            _: DateTime<Utc>,
            _: Duration,
        ) -> StoreResult<Option<Session>> {
            self.fail()
        }
        async fn append_turn(
            &self,
            _: &str,
            _: &Message,
            _: &Message,
            _: Option<Language>,
            _: DateTime<Utc>,
            _: Duration,
        ) -> StoreResult<bool> {
            self.fail()
        }
        async fn touch(&self, _: &str, _: DateTime<Utc>, _: Duration) -> StoreResult<bool> {
            self.fail()
        }
        async fn remove(&self, _: &str, _: DateTime<Utc>, _: Duration) -> StoreResult<bool> {
            self.removals.fetch_add(1, Ordering::SeqCst);
            if self.error.is_outage() {
                self.fail()
            } else {
                Ok(true)
            }
        }
        async fn admit(
            &self,
            _: &str,
            _: DateTime<Utc>,
            _: Duration,
            _: u32,
        ) -> StoreResult<Admission> {
            self.fail()
        }
        async fn purge_expired(
            &self,
            _: DateTime<Utc>,
            _: Duration,
            _: Duration,
        ) -> StoreResult<usize> {
            self.fail()
        }
        async fn session_count(&self) -> StoreResult<Option<usize>> {
            self.fail()
        }
        async fn ping(&self) -> StoreResult<()> {
            if self.error.is_outage() {
                self.fail()
            } else {
                Ok(())
            }
        }
        async fn clear(&self) -> StoreResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_memory_only_is_not_degraded() {
        let backend = FailoverBackend::memory_only(Arc::new(MemoryBackend::new()));
        assert!(!backend.is_degraded());
        assert_eq!(backend.name(), "memory");

        let health = backend.health().await;
        assert!(health.reachable);
        assert!(!health.degraded);
        assert_eq!(health.active_sessions, Some(0));
    }

    #[tokio::test]
    async fn test_runtime_failure_trips_to_fallback() {
        let fallback = Arc::new(MemoryBackend::new());
        let backend = FailoverBackend::new(Arc::new(BrokenBackend::down()), Arc::clone(&fallback));
        assert_eq!(backend.name(), "broken");

        let session = Session::new();
        let ttl = Duration::from_secs(60);
        backend.insert_session(&session, ttl).await.unwrap();

        assert!(backend.is_degraded());
        assert_eq!(backend.name(), "memory");
        let loaded = backend
            .load_session(&session.id, Utc::now(), ttl)
            .await
            .unwrap();
        assert_eq!(loaded.map(|s| s.id), Some(session.id));
    }

    #[tokio::test]
    async fn test_degraded_from_start_reports_reason() {
        let backend = FailoverBackend::degraded_from_start(
            Arc::new(MemoryBackend::new()),
            "connection refused",
        );
        let health = backend.health().await;
        assert!(health.degraded);
        assert_eq!(health.backend, "memory");
        assert_eq!(health.error.as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn test_admit_falls_back() {
        let backend =
            FailoverBackend::new(Arc::new(BrokenBackend::down()), Arc::new(MemoryBackend::new()));
        let admission = backend
            .admit("visitor", Utc::now(), Duration::from_secs(60), 2)
            .await
            .unwrap();
        assert!(admission.allowed);
        assert!(backend.is_degraded());
    }

    #[tokio::test]
    async fn test_corrupt_record_reads_as_absent_without_failover() {
        let primary = Arc::new(BrokenBackend::corrupt());
        let backend = FailoverBackend::new(primary.clone(), Arc::new(MemoryBackend::new()));

        let loaded = backend
            .load_session("bad-record", Utc::now(), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(loaded.is_none());
        assert!(!backend.is_degraded());
        assert_eq!(backend.name(), "broken");
        assert_eq!(primary.removals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_corrupt_admit_reply_keeps_primary() {
        let backend = FailoverBackend::new(
            Arc::new(BrokenBackend::corrupt()),
            Arc::new(MemoryBackend::new()),
        );

        let admission = backend
            .admit("visitor", Utc::now(), Duration::from_secs(60), 2)
            .await
            .unwrap();

        assert!(admission.allowed);
        assert!(!backend.is_degraded());
    }

    #[tokio::test]
    async fn test_corrupt_write_is_returned_not_absorbed() {
        let backend = FailoverBackend::new(
            Arc::new(BrokenBackend::corrupt()),
            Arc::new(MemoryBackend::new()),
        );

        let err = backend
            .insert_session(&Session::new(), Duration::from_secs(60))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Corrupt { .. }));
        assert!(!backend.is_degraded());
        assert!(!backend.health().await.degraded);
    }

    #[test]
    fn test_outage_classification() {
        assert!(StoreError::unavailable("redis", "refused").is_outage());
        assert!(StoreError::timeout("redis", "ping", Duration::from_millis(5)).is_outage());
        assert!(!StoreError::corrupt("bad json").is_outage());
    }
}
