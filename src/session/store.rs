//! Session store facade
//!
//! Owns the TTL policy and the clock; delegates storage to a `FailoverBackend`, which already
//! absorbs outages of an external backend. The same backend instance is shared with the
//! rate limiter.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::session::types::{Language, Message, Session};
use crate::store::{FailoverBackend, MemoryBackend, StoreBackend, StoreHealth};
use crate::utils::error::Result;

/// Lower bound applied to configured TTLs
pub const MIN_SESSION_TTL: Duration = Duration::from_secs(60);

pub struct SessionStore {
    backend: Arc<FailoverBackend>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(backend: Arc<FailoverBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    /// In-process store with no external backend
    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(
            Arc::new(FailoverBackend::memory_only(Arc::new(MemoryBackend::new()))),
            ttl,
        )
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Shared backend, for components keyed on the same ids
    pub fn backend(&self) -> Arc<FailoverBackend> {
        Arc::clone(&self.backend)
    }

    /// Allocates and stores a new empty session
    pub async fn create(&self) -> Result<Session> {
        let session = Session::new();
        self.backend.insert_session(&session, self.ttl).await?;
        debug!(session_id = %session.id, backend = self.backend.name(), "Session created");
        Ok(session)
    }

    /// Returns the session unless it is unknown or idle past the TTL
    pub async fn get(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.backend.load_session(id, Utc::now(), self.ttl).await?)
    }

    /// Appends one user/assistant pair atomically and slides the TTL
    ///
    /// Returns false if the session expired or was deleted while the turn was running.
    pub async fn append_turn(
        &self,
        id: &str,
        user: Message,
        assistant: Message,
        language: Option<Language>,
    ) -> Result<bool> {
        let appended = self
            .backend
            .append_turn(id, &user, &assistant, language, Utc::now(), self.ttl)
            .await?;
        if !appended {
            warn!(session_id = %id, "Session vanished before turn could be stored");
        }
        Ok(appended)
    }

    /// Slides the TTL without touching history
    pub async fn touch(&self, id: &str) -> Result<bool> {
        Ok(self.backend.touch(id, Utc::now(), self.ttl).await?)
    }

    /// Removes the session and its rate window. Idempotent; returns whether it existed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let removed = self.backend.remove(id, Utc::now(), self.ttl).await?;
        if removed {
            info!(session_id = %id, "Session deleted");
        }
        Ok(removed)
    }

    pub async fn health(&self) -> StoreHealth {
        self.backend.health().await
    }

    pub fn is_degraded(&self) -> bool {
        self.backend.is_degraded()
    }

    /// Drops in-process state at shutdown
    pub async fn clear(&self) -> Result<()> {
        Ok(self.backend.clear().await?)
    }
}
