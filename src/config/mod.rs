pub mod loader;
pub mod schema;

pub use loader::{CliOverrides, load_config};
pub use schema::{
    Config, ModelConfig, NotifierConfig, PersonaConfig, RateLimitConfig, SafeSummary,
    ServerConfig, SessionConfig, TranscriptConfig,
};
