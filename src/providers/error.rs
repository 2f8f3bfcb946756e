//! Errors from the model backend
//!
//! Classification drives two decisions: whether the HTTP client may retry a single request,
//! and which event label the conversation loop logs before it falls back.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// Connection refused, DNS failure, reset
    #[error("Network error: {message}")]
    Network { message: String },

    /// Invalid or missing API key
    #[error("Authentication error: {message}")]
    Auth { message: String },

    /// Upstream quota or throttling
    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        retry_after: Option<u64>,
    },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Request timeout after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// Error reported by the service itself
    #[error("Provider error: {message}")]
    Provider {
        message: String,
        code: Option<String>,
    },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl ProviderError {
    /// Transient failures that one more HTTP attempt may fix
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Network { .. }
                | ProviderError::RateLimit { .. }
                | ProviderError::Timeout { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ProviderError::Timeout { .. })
    }

    /// Suggested wait before retrying, in seconds
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            ProviderError::RateLimit { retry_after, .. } => *retry_after,
            ProviderError::Network { .. } => Some(1),
            ProviderError::Timeout { .. } => Some(2),
            _ => None,
        }
    }

    /// Short label for structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Network { .. } => "network",
            ProviderError::Auth { .. } => "auth",
            ProviderError::RateLimit { .. } => "rate_limit",
            ProviderError::InvalidRequest { .. } => "invalid_request",
            ProviderError::Timeout { .. } => "timeout",
            ProviderError::Provider { .. } => "provider",
            ProviderError::Serialization { .. } => "serialization",
            ProviderError::Config { .. } => "config",
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    pub fn rate_limit(message: impl Into<String>, retry_after: Option<u64>) -> Self {
        Self::RateLimit {
            message: message.into(),
            retry_after,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn timeout(seconds: u64) -> Self {
        Self::Timeout { seconds }
    }

    pub fn provider(message: impl Into<String>, code: Option<impl Into<String>>) -> Self {
        Self::Provider {
            message: message.into(),
            code: code.map(|c| c.into()),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ProviderError::network("reset").is_retryable());
        assert!(ProviderError::timeout(30).is_retryable());
        assert!(ProviderError::rate_limit("slow down", Some(5)).is_retryable());
        assert!(!ProviderError::auth("bad key").is_retryable());
        assert!(!ProviderError::invalid_request("bad tool schema").is_retryable());
    }

    #[test]
    fn test_retry_after_defaults() {
        assert_eq!(ProviderError::network("x").retry_after(), Some(1));
        assert_eq!(ProviderError::rate_limit("x", Some(7)).retry_after(), Some(7));
        assert_eq!(ProviderError::auth("x").retry_after(), None);
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(ProviderError::timeout(1).kind(), "timeout");
        assert_eq!(
            ProviderError::provider("boom", Some::<&str>("500")).kind(),
            "provider"
        );
    }

    #[test]
    fn test_display_mentions_timeout_seconds() {
        assert_eq!(
            ProviderError::timeout(30).to_string(),
            "Request timeout after 30 seconds"
        );
    }
}
