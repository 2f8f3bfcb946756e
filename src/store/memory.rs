//! In-process backend built on `DashMap`
//!
//! Each key's entry is mutated under its shard's write guard, which gives per-key atomicity
//! for append and admission without a map-wide lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

use super::{Admission, StoreBackend, StoreResult};
use crate::session::types::duration_millis;
use crate::session::{Language, Message, Session};

#[derive(Debug, Default)]
pub struct MemoryBackend {
    sessions: DashMap<String, Session>,
    windows: DashMap<String, VecDeque<DateTime<Utc>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn in_window(ts: &DateTime<Utc>, now: DateTime<Utc>, window_ms: i64) -> bool {
    now.signed_duration_since(*ts).num_milliseconds() < window_ms
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn insert_session(&self, session: &Session, _ttl: Duration) -> StoreResult<()> {
        self.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn load_session(
        &self,
        id: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> StoreResult<Option<Session>> {
        match self.sessions.get(id) {
            None => return Ok(None),
            Some(session) if !session.is_expired_at(now, ttl) => {
                return Ok(Some(session.clone()));
            }
            Some(_) => {}
        }

        // Read guard is released; evict lazily.
        self.sessions
            .remove_if(id, |_, session| session.is_expired_at(now, ttl));
        debug!(session_id = %id, "Evicted expired session on read");
        Ok(None)
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
        let Some(mut session) = self.sessions.get_mut(id) else {
            return Ok(false);
        };
        if session.is_expired_at(now, ttl) {
            return Ok(false);
        }
        session.record_turn(user.clone(), assistant.clone(), language, now);
        Ok(true)
    }

    async fn touch(&self, id: &str, now: DateTime<Utc>, ttl: Duration) -> StoreResult<bool> {
        let Some(mut session) = self.sessions.get_mut(id) else {
            return Ok(false);
        };
        if session.is_expired_at(now, ttl) {
            return Ok(false);
        }
        session.last_interaction_at = now;
        Ok(true)
    }

    async fn remove(&self, id: &str, now: DateTime<Utc>, ttl: Duration) -> StoreResult<bool> {
        self.windows.remove(id);
        Ok(self
            .sessions
            .remove(id)
            .is_some_and(|(_, session)| !session.is_expired_at(now, ttl)))
    }

    async fn admit(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
        max: u32,
    ) -> StoreResult<Admission> {
        let window_ms = duration_millis(window);
        let mut entry = self.windows.entry(key.to_string()).or_default();

        entry.retain(|ts| in_window(ts, now, window_ms));
        let count = u32::try_from(entry.len()).unwrap_or(u32::MAX);

        if count < max {
            entry.push_back(now);
            return Ok(Admission::admitted(count + 1));
        }

        let oldest = entry.iter().min().copied().unwrap_or(now);
        let age_ms = now.signed_duration_since(oldest).num_milliseconds();
        let wait_ms = (window_ms - age_ms).max(0) as u64;
        Ok(Admission::denied(Duration::from_millis(wait_ms), count))
    }

    async fn purge_expired(
        &self,
        now: DateTime<Utc>,
        ttl: Duration,
        window: Duration,
    ) -> StoreResult<usize> {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| !session.is_expired_at(now, ttl));
        let purged = before.saturating_sub(self.sessions.len());

        let window_ms = duration_millis(window);
        self.windows.retain(|_, stamps| {
            stamps.retain(|ts| in_window(ts, now, window_ms));
            !stamps.is_empty()
        });

        Ok(purged)
    }

    async fn session_count(&self) -> StoreResult<Option<usize>> {
        Ok(Some(self.sessions.len()))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn clear(&self) -> StoreResult<()> {
        self.sessions.clear();
        self.windows.clear();
        Ok(())
    }
}
