//! Conversation handling: language inference, context assembly, tools and the turn loop

pub mod context;
pub mod language;
pub mod metrics;
pub mod orchestrator;
pub mod tools;

pub use context::{ContextBuilder, ContextConfig, HistoryEntry, Persona};
pub use language::{detect_language, fallback_message, rate_limit_message};
pub use metrics::{TurnMetrics, TurnOutcome, TurnSnapshot};
pub use orchestrator::{ConversationOrchestrator, OrchestratorConfig, TurnReply, TurnRequest};
pub use tools::{Tool, ToolContext, ToolDispatcher, ToolError, ToolOutcome};
