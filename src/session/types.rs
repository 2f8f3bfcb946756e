use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Language a visitor writes in, as far as we can tell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "no")]
    Norwegian,
    #[serde(rename = "en")]
    English,
}

impl Language {
    /// ISO 639-1 code
    pub fn code(&self) -> &'static str {
        match self {
            Language::Norwegian => "no",
            Language::English => "en",
        }
    }

    /// Parses an ISO 639-1 code
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "no" | "nb" | "nn" => Some(Language::Norwegian),
            "en" => Some(Language::English),
            _ => None,
        }
    }

    /// Human-readable name used in prompts
    pub fn display_name(&self) -> &'static str {
        match self {
            Language::Norwegian => "Norwegian",
            Language::English => "English",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

/// One entry of a session history. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub history: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub last_interaction_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_hint: Option<Language>,
}

impl Session {
    /// Fresh session with a random v4 id and empty history
    pub fn new() -> Self {
        Self::new_at(Utc::now())
    }

    pub fn new_at(now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            history: Vec::new(),
            created_at: now,
            last_interaction_at: now,
            language_hint: None,
        }
    }

    /// True once the session has been idle for `ttl` or longer at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>, ttl: std::time::Duration) -> bool {
        let idle_ms = now
            .signed_duration_since(self.last_interaction_at)
            .num_milliseconds();
        idle_ms >= duration_millis(ttl)
    }

    pub(crate) fn record_turn(
        &mut self,
        user: Message,
        assistant: Message,
        language: Option<Language>,
        now: DateTime<Utc>,
    ) {
        self.history.push(user);
        self.history.push(assistant);
        self.last_interaction_at = now;
        if language.is_some() {
            self.language_hint = language;
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Milliseconds in `d`, saturating at `i64::MAX`
pub(crate) fn duration_millis(d: std::time::Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}
