//! Utility modules for cross-cutting concerns

pub mod circuit_breaker;
pub mod error;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use error::{ParleyError, Result};
