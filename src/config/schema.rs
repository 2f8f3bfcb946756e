use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::providers::openai::DEFAULT_MODEL;
use crate::session::MIN_SESSION_TTL;

/// Smallest model/tool budget a turn may be left with after its store and transcript work
pub const MIN_TURN_BUDGET: Duration = Duration::from_secs(5);

/// Slack kept between the turn deadline and the HTTP timeout for serialization and routing
const TURN_SLACK: Duration = Duration::from_secs(1);

/// Store calls made outside the model rounds: resolve, admit, touch or append, plus one retry
const STORE_CALLS_PER_TURN: u32 = 4;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub rate_limit: RateLimitConfig,
    pub model: ModelConfig,
    pub notifier: NotifierConfig,
    pub transcript: TranscriptConfig,
    pub persona: PersonaConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on a whole HTTP request
    pub request_timeout_secs: u64,
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub ttl_secs: u64,
    /// How often expired in-process sessions are swept
    pub sweep_interval_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,
    pub redis_prefix: String,
    /// Per-operation timeout for Redis calls
    pub redis_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            sweep_interval_secs: 60,
            redis_url: None,
            redis_prefix: "parley".to_string(),
            redis_timeout_ms: 500,
        }
    }
}

impl SessionConfig {
    /// Configured TTL, never below `MIN_SESSION_TTL`
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs).max(MIN_SESSION_TTL)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn redis_timeout(&self) -> Duration {
        Duration::from_millis(self.redis_timeout_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    /// 0 disables rate limiting
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            max_requests: 8,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub model: String,
    /// Per HTTP attempt
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub max_tool_rounds: u32,
    pub max_message_chars: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: DEFAULT_MODEL.to_string(),
            timeout_secs: 30,
            max_retries: 2,
            max_tool_rounds: 5,
            max_message_chars: 4_000,
        }
    }
}

impl ModelConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Bound on one model call including the client's retries and their backoff
    pub fn call_budget(&self) -> Duration {
        let attempts = u64::from(self.max_retries) + 1;
        self.request_timeout() * attempts as u32
            + Duration::from_secs(2 * u64::from(self.max_retries))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pushover_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pushover_user: Option<String>,
    pub timeout_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            pushover_token: None,
            pushover_user: None,
            timeout_secs: 5,
        }
    }
}

impl NotifierConfig {
    /// Both Pushover credentials, if configured
    pub fn pushover_credentials(&self) -> Option<(&str, &str)> {
        match (self.pushover_token.as_deref(), self.pushover_user.as_deref()) {
            (Some(token), Some(user)) if !token.is_empty() && !user.is_empty() => {
                Some((token, user))
            }
            _ => None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptConfig {
    /// JSON Lines file to append to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Endpoint receiving each entry as JSON; wins over `path` when both are set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            path: None,
            webhook_url: None,
            timeout_secs: 2,
        }
    }
}

impl TranscriptConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaConfig {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_path: Option<PathBuf>,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: "Portfolio Owner".to_string(),
            summary_path: None,
            profile_path: None,
        }
    }
}

/// Loggable view of the configuration with secrets reduced to flags
#[derive(Debug, Clone, Serialize)]
pub struct SafeSummary {
    pub bind: String,
    pub model: String,
    pub api_key_configured: bool,
    pub redis_configured: bool,
    pub notifier_configured: bool,
    pub transcript_backend: &'static str,
    pub session_ttl_secs: u64,
    pub rate_limit: String,
}

impl Config {
    /// Part of the request timeout spent outside the model rounds, at worst
    pub fn turn_reserve(&self) -> Duration {
        self.transcript.timeout() + self.session.redis_timeout() * STORE_CALLS_PER_TURN + TURN_SLACK
    }

    /// Deadline for the model/tool rounds of one turn, so a failing turn still answers with an
    /// apology before the HTTP layer gives up on the request
    pub fn turn_budget(&self) -> Duration {
        self.server
            .request_timeout()
            .saturating_sub(self.turn_reserve())
    }

    pub fn get_safe_summary(&self) -> SafeSummary {
        let transcript_backend = if self.transcript.webhook_url.is_some() {
            "webhook"
        } else if self.transcript.path.is_some() {
            "file"
        } else {
            "disabled"
        };

        SafeSummary {
            bind: format!("{}:{}", self.server.host, self.server.port),
            model: self.model.model.clone(),
            api_key_configured: self.model.api_key.as_deref().is_some_and(|k| !k.is_empty()),
            redis_configured: self.session.redis_url.is_some(),
            notifier_configured: self.notifier.pushover_credentials().is_some(),
            transcript_backend,
            session_ttl_secs: self.session.ttl().as_secs(),
            rate_limit: format!(
                "{}/{}s",
                self.rate_limit.max_requests, self.rate_limit.window_secs
            ),
        }
    }
}
