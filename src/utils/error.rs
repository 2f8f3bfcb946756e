//! Centralized error types for parley
//!
//! Library code returns `ParleyError` (or a per-concern error that converts into it).
//! The binary wraps startup failures in `anyhow` for context.

use std::path::PathBuf;
use thiserror::Error;

use crate::store::StoreError;

/// Crate-level error type
#[derive(Error, Debug)]
pub enum ParleyError {
    /// Visitor input rejected before any state mutation
    #[error("{message}")]
    Validation { message: String },

    /// Explicit lookup or delete of a session that does not exist
    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    /// Session/rate storage failure that could not be absorbed by failover
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// IO errors with path context
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// External service errors (model backend, notifier, transcript sink)
    #[error("External service error ({service}): {message}")]
    ExternalService { service: String, message: String },
}

impl ParleyError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a session-not-found error
    pub fn session_not_found(session_id: impl Into<String>) -> Self {
        Self::SessionNotFound {
            session_id: session_id.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an IO error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create an external service error
    pub fn external_service(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Returns true if the server can keep serving after this error
    pub fn is_recoverable(&self) -> bool {
        match self {
            ParleyError::Validation { .. } => true,
            ParleyError::SessionNotFound { .. } => true,
            ParleyError::Store(_) => true,
            ParleyError::ExternalService { .. } => true,
            ParleyError::Io { .. } => true,
            ParleyError::Serialization { .. } => false,
            ParleyError::Config { .. } => false,
        }
    }

    /// Returns the level this error should be logged at
    pub fn severity(&self) -> tracing::Level {
        match self {
            ParleyError::Config { .. } => tracing::Level::ERROR,
            ParleyError::Serialization { .. } => tracing::Level::ERROR,
            ParleyError::Store(_) => tracing::Level::WARN,
            ParleyError::ExternalService { .. } => tracing::Level::WARN,
            ParleyError::Io { .. } => tracing::Level::WARN,
            ParleyError::Validation { .. } => tracing::Level::INFO,
            ParleyError::SessionNotFound { .. } => tracing::Level::INFO,
        }
    }
}

/// Result type alias using ParleyError
pub type Result<T> = std::result::Result<T, ParleyError>;

impl From<serde_json::Error> for ParleyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}
