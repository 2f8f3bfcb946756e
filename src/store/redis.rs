//! Redis backend
//!
//! Layout per session id:
//! - `{prefix}:session:{id}` hash with `created_at`, `last_interaction_at`, `language_hint`
//! - `{prefix}:history:{id}` list of JSON-encoded messages
//! - `{prefix}:rate:{id}` sorted set of request timestamps (score = epoch millis)
//!
//! Multi-key mutations run as Lua scripts so each is atomic server-side. Expiry is native
//! (`PEXPIRE`), so `purge_expired` has nothing to do here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{RedisResult, Script};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::{Admission, StoreBackend, StoreError, StoreResult};
use crate::session::types::duration_millis;
use crate::session::{Language, Message, Session};

const BACKEND: &str = "redis";

const APPEND_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
redis.call('RPUSH', KEYS[2], ARGV[1], ARGV[2])
redis.call('HSET', KEYS[1], 'last_interaction_at', ARGV[3])
if ARGV[5] ~= '' then
  redis.call('HSET', KEYS[1], 'language_hint', ARGV[5])
end
redis.call('PEXPIRE', KEYS[1], ARGV[4])
redis.call('PEXPIRE', KEYS[2], ARGV[4])
return 1
"#;

const TOUCH_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
redis.call('HSET', KEYS[1], 'last_interaction_at', ARGV[1])
redis.call('PEXPIRE', KEYS[1], ARGV[2])
if redis.call('EXISTS', KEYS[2]) == 1 then
  redis.call('PEXPIRE', KEYS[2], ARGV[2])
end
return 1
"#;

// Returns {allowed, count, retry_after_ms}
const ADMIT_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local max = tonumber(ARGV[3])
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now - window)
local count = redis.call('ZCARD', KEYS[1])
if count < max then
  redis.call('ZADD', KEYS[1], now, ARGV[4])
  redis.call('PEXPIRE', KEYS[1], window)
  return {1, count + 1, 0}
end
local oldest = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
local wait = 0
if oldest[2] then
  wait = tonumber(oldest[2]) + window - now
end
return {0, count, wait}
"#;

pub struct RedisBackend {
    conn: ConnectionManager,
    prefix: String,
    op_timeout: Duration,
    append_script: Script,
    touch_script: Script,
    admit_script: Script,
}

impl RedisBackend {
    /// Connects and verifies the server answers `PING` within `op_timeout`
    pub async fn connect(
        url: &str,
        prefix: impl Into<String>,
        op_timeout: Duration,
    ) -> StoreResult<Self> {
        let client =
            redis::Client::open(url).map_err(|e| StoreError::unavailable(BACKEND, e.to_string()))?;

        let conn = tokio::time::timeout(op_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::timeout(BACKEND, "connect", op_timeout))?
            .map_err(|e| StoreError::unavailable(BACKEND, e.to_string()))?;

        let backend = Self {
            conn,
            prefix: prefix.into(),
            op_timeout,
            append_script: Script::new(APPEND_SCRIPT),
            touch_script: Script::new(TOUCH_SCRIPT),
            admit_script: Script::new(ADMIT_SCRIPT),
        };
        backend.ping().await?;
        info!(prefix = %backend.prefix, "Connected to redis session store");
        Ok(backend)
    }

    fn session_key(&self, id: &str) -> String {
        format!("{}:session:{}", self.prefix, id)
    }

    fn history_key(&self, id: &str) -> String {
        format!("{}:history:{}", self.prefix, id)
    }

    fn rate_key(&self, id: &str) -> String {
        format!("{}:rate:{}", self.prefix, id)
    }

    /// Runs one redis round-trip under the operation timeout
    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = RedisResult<T>>,
    ) -> StoreResult<T> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(StoreError::unavailable(BACKEND, e.to_string())),
            Err(_) => Err(StoreError::timeout(BACKEND, operation, self.op_timeout)),
        }
    }
}

fn encode(message: &Message) -> StoreResult<String> {
    serde_json::to_string(message).map_err(|e| StoreError::corrupt(e.to_string()))
}

fn parse_time(meta: &HashMap<String, String>, field: &str) -> StoreResult<DateTime<Utc>> {
    let raw = meta
        .get(field)
        .ok_or_else(|| StoreError::corrupt(format!("session hash missing {field}")))?;
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::corrupt(format!("{field}: {e}")))
}

fn decode_session(
    id: &str,
    meta: &HashMap<String, String>,
    raw_history: &[String],
) -> StoreResult<Session> {
    let history = raw_history
        .iter()
        .map(|raw| serde_json::from_str::<Message>(raw))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StoreError::corrupt(e.to_string()))?;

    Ok(Session {
        id: id.to_string(),
        history,
        created_at: parse_time(meta, "created_at")?,
        last_interaction_at: parse_time(meta, "last_interaction_at")?,
        language_hint: meta
            .get("language_hint")
            .and_then(|code| Language::from_code(code)),
    })
}

#[async_trait]
impl StoreBackend for RedisBackend {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn insert_session(&self, session: &Session, ttl: Duration) -> StoreResult<()> {
        let session_key = self.session_key(&session.id);
        let history_key = self.history_key(&session.id);
        let ttl_ms = duration_millis(ttl);

        let mut fields = vec![
            ("created_at", session.created_at.to_rfc3339()),
            ("last_interaction_at", session.last_interaction_at.to_rfc3339()),
        ];
        if let Some(language) = session.language_hint {
            fields.push(("language_hint", language.code().to_string()));
        }

        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(&history_key)
            .ignore()
            .hset_multiple(&session_key, &fields)
            .ignore()
            .pexpire(&session_key, ttl_ms)
            .ignore();
        if !session.history.is_empty() {
            for message in &session.history {
                pipe.rpush(&history_key, encode(message)?).ignore();
            }
            pipe.pexpire(&history_key, ttl_ms).ignore();
        }

        let mut conn = self.conn.clone();
        self.bounded("insert_session", pipe.query_async(&mut conn))
            .await
    }

    async fn load_session(
        &self,
        id: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> StoreResult<Option<Session>> {
        let mut pipe = redis::pipe();
        pipe.atomic()
            .hgetall(self.session_key(id))
            .lrange(self.history_key(id), 0, -1);

        let mut conn = self.conn.clone();
        let (meta, raw_history): (HashMap<String, String>, Vec<String>) = self
            .bounded("load_session", pipe.query_async(&mut conn))
            .await?;

        if meta.is_empty() {
            return Ok(None);
        }

        let session = decode_session(id, &meta, &raw_history)?;
        if session.is_expired_at(now, ttl) {
            debug!(session_id = %id, "Redis session past TTL, treating as absent");
            return Ok(None);
        }
        Ok(Some(session))
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
        let mut invocation = self.append_script.prepare_invoke();
        invocation
            .key(self.session_key(id))
            .key(self.history_key(id))
            .arg(encode(user)?)
            .arg(encode(assistant)?)
            .arg(now.to_rfc3339())
            .arg(duration_millis(ttl))
            .arg(language.map(|l| l.code()).unwrap_or(""));

        let mut conn = self.conn.clone();
        let appended: i64 = self
            .bounded("append_turn", invocation.invoke_async(&mut conn))
            .await?;
        Ok(appended == 1)
    }

    async fn touch(&self, id: &str, now: DateTime<Utc>, ttl: Duration) -> StoreResult<bool> {
        let mut invocation = self.touch_script.prepare_invoke();
        invocation
            .key(self.session_key(id))
            .key(self.history_key(id))
            .arg(now.to_rfc3339())
            .arg(duration_millis(ttl));

        let mut conn = self.conn.clone();
        let touched: i64 = self
            .bounded("touch", invocation.invoke_async(&mut conn))
            .await?;
        Ok(touched == 1)
    }

    // Key expiry already drops idle sessions, so a hit here is always live
    async fn remove(&self, id: &str, _now: DateTime<Utc>, _ttl: Duration) -> StoreResult<bool> {
        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(self.session_key(id))
            .del(self.history_key(id))
            .ignore()
            .del(self.rate_key(id))
            .ignore();

        let mut conn = self.conn.clone();
        let (removed,): (i64,) = self.bounded("remove", pipe.query_async(&mut conn)).await?;
        Ok(removed > 0)
    }

    async fn admit(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
        max: u32,
    ) -> StoreResult<Admission> {
        let now_ms = now.timestamp_millis();
        let mut invocation = self.admit_script.prepare_invoke();
        invocation
            .key(self.rate_key(key))
            .arg(now_ms)
            .arg(duration_millis(window))
            .arg(max)
            .arg(format!("{}-{}", now_ms, Uuid::new_v4()));

        let mut conn = self.conn.clone();
        let reply: Vec<i64> = self
            .bounded("admit", invocation.invoke_async(&mut conn))
            .await?;

        let [allowed, count, wait_ms] = reply[..] else {
            return Err(StoreError::corrupt(format!(
                "unexpected admit reply: {reply:?}"
            )));
        };
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        if allowed == 1 {
            Ok(Admission::admitted(count))
        } else {
            let wait = Duration::from_millis(u64::try_from(wait_ms).unwrap_or(0));
            Ok(Admission::denied(wait, count))
        }
    }

    async fn purge_expired(
        &self,
        _now: DateTime<Utc>,
        _ttl: Duration,
        _window: Duration,
    ) -> StoreResult<usize> {
        Ok(0)
    }

    async fn session_count(&self) -> StoreResult<Option<usize>> {
        Ok(None)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _pong: String = self
            .bounded("ping", redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }

    async fn clear(&self) -> StoreResult<()> {
        // Redis state outlives the process.
        Ok(())
    }
}
