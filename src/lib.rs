//! parley: backend for a visitor-facing chat assistant
//!
//! Keeps short-lived per-visitor sessions, rate-limits visitors per session, lets the model
//! record leads and unanswered questions through tools, and serves it all over HTTP.

pub mod agent;
pub mod config;
pub mod handlers;
pub mod notify;
pub mod providers;
pub mod ratelimit;
pub mod server;
pub mod session;
pub mod store;
pub mod transcript;
pub mod utils;
