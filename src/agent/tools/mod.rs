//! Tools the model may call mid-conversation
//!
//! The registry is fixed when the dispatcher is built. Dispatch never fails the turn: unknown
//! tools, malformed arguments and tool errors all come back as an `{"error": ...}` payload the
//! model can read.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::notify::BestEffortNotifier;

pub mod lead;
pub mod question;
pub mod types;

pub use lead::RecordUserDetailsTool;
pub use question::RecordUnknownQuestionTool;
pub use types::{
    Tool, ToolContext, ToolError, ToolOutcome, ToolResult, optional_str, validate_required_args,
};

pub struct ToolDispatcher {
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Registration order, so definitions are stable across calls
    order: Vec<String>,
}

impl ToolDispatcher {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Dispatcher holding `record_user_details` and `record_unknown_question`
    pub fn with_default_tools(notifier: Arc<BestEffortNotifier>) -> Self {
        let mut dispatcher = Self::new();
        dispatcher.insert(Arc::new(RecordUserDetailsTool::new(notifier.clone())));
        dispatcher.insert(Arc::new(RecordUnknownQuestionTool::new(notifier)));
        dispatcher
    }

    /// Adds a tool; names must be unique
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> ToolResult<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::ExecutionFailed {
                tool: name.clone(),
                message: format!("Tool '{}' is already registered", name),
            });
        }
        self.insert(tool);
        Ok(())
    }

    fn insert(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions in OpenAI function-calling format
    pub fn definitions(&self) -> Vec<Value> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.definition())
            .collect()
    }

    /// Runs one call requested by the model. `arguments` is the raw JSON text it produced.
    pub async fn dispatch(&self, name: &str, arguments: &str, ctx: &ToolContext) -> ToolOutcome {
        let Some(tool) = self.tools.get(name) else {
            tracing::warn!(session_id = %ctx.session_id, tool = name, "tool_missing");
            return ToolOutcome::failure(&ToolError::NotFound(name.to_string()));
        };

        let args = match parse_arguments(name, arguments)
            .and_then(|args| validate_required_args(&args, &tool.parameters(), name).map(|_| args))
        {
            Ok(args) => args,
            Err(e) => {
                tracing::warn!(
                    session_id = %ctx.session_id,
                    tool = name,
                    error = %e,
                    "tool_invalid_arguments"
                );
                return ToolOutcome::failure(&e);
            }
        };

        let started = Instant::now();
        let outcome = tool
            .execute(args, ctx)
            .await
            .unwrap_or_else(|e| ToolOutcome::failure(&e));

        tracing::info!(
            session_id = %ctx.session_id,
            tool = name,
            success = outcome.success,
            duration_ms = started.elapsed().as_millis() as u64,
            "tool_invoked"
        );

        outcome
    }
}

impl Default for ToolDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_arguments(tool: &str, arguments: &str) -> ToolResult<HashMap<String, Value>> {
    if arguments.trim().is_empty() {
        return Ok(HashMap::new());
    }
    serde_json::from_str(arguments).map_err(|e| ToolError::InvalidArguments {
        tool: tool.to_string(),
        message: format!("arguments are not a JSON object: {}", e),
    })
}
