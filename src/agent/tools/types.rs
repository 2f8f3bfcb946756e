//! Types for the tool system
//!
//! - `Tool` trait implemented by every side-effecting operation the model may request
//! - `ToolError` and the `ToolResult` alias
//! - `ToolContext` describing the turn a call belongs to
//! - `ToolOutcome` returned to the conversation loop

use serde_json::{Value, json};
use std::collections::HashMap;

use crate::session::Language;

/// Checks that every field listed in the schema's `required` array is present and non-empty
pub fn validate_required_args(
    args: &HashMap<String, Value>,
    schema: &Value,
    tool_name: &str,
) -> ToolResult<()> {
    let Some(required) = schema.get("required").and_then(Value::as_array) else {
        return Ok(());
    };

    for field in required.iter().filter_map(Value::as_str) {
        let present = match args.get(field) {
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(Value::Null) | None => false,
            Some(_) => true,
        };
        if !present {
            return Err(ToolError::InvalidArguments {
                tool: tool_name.to_string(),
                message: format!("Missing required parameter '{}'", field),
            });
        }
    }

    Ok(())
}

/// Reads an optional string argument, treating blank strings as absent
pub fn optional_str<'a>(args: &'a HashMap<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    /// Tool not found in registry
    #[error("Unknown tool: {0}")]
    NotFound(String),

    #[error("Invalid arguments for tool '{tool}': {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("Tool '{tool}' execution failed: {message}")]
    ExecutionFailed { tool: String, message: String },
}

impl ToolError {
    /// Name of the tool that produced the error, `<unnamed>` when blank
    pub fn tool_name(&self) -> &str {
        let name = match self {
            ToolError::NotFound(name) => name.as_str(),
            ToolError::InvalidArguments { tool, .. } => tool.as_str(),
            ToolError::ExecutionFailed { tool, .. } => tool.as_str(),
        };

        if name.trim().is_empty() {
            "<unnamed>"
        } else {
            name
        }
    }

    /// Payload handed back to the model in place of a result
    pub fn to_payload(&self) -> Value {
        json!({ "error": self.to_string() })
    }
}

pub type ToolResult<T> = std::result::Result<T, ToolError>;

/// Turn a tool call belongs to
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub session_id: String,
    /// Language inferred for the visitor's message
    pub language: Option<Language>,
}

impl ToolContext {
    pub fn new(session_id: impl Into<String>, language: Option<Language>) -> Self {
        Self {
            session_id: session_id.into(),
            language,
        }
    }
}

/// Result of one dispatched call, as fed back to the model
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub payload: Value,
    pub success: bool,
}

impl ToolOutcome {
    pub fn success(payload: Value) -> Self {
        Self {
            payload,
            success: true,
        }
    }

    pub fn failure(error: &ToolError) -> Self {
        Self {
            payload: error.to_payload(),
            success: false,
        }
    }

    /// Canned acknowledgment returned by the recording tools
    pub fn recorded() -> Self {
        Self::success(json!({ "recorded": "ok" }))
    }

    /// JSON text placed in the tool-result message
    pub fn to_content(&self) -> String {
        self.payload.to_string()
    }
}

/// Operation the model may request during a turn
///
/// Implementations are registered once in the dispatcher and never change afterwards.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Unique name, as used in the model's function call
    fn name(&self) -> &str;

    /// Description shown to the model
    fn description(&self) -> &str;

    /// JSON Schema for the arguments: `type: "object"`, `properties`, `required`
    fn parameters(&self) -> Value;

    /// Runs the tool with arguments that already passed `validate_required_args`
    async fn execute(
        &self,
        args: HashMap<String, Value>,
        ctx: &ToolContext,
    ) -> ToolResult<ToolOutcome>;

    /// OpenAI function-calling definition of this tool
    fn definition(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name(),
                "description": self.description(),
                "parameters": self.parameters(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_required_args_present() {
        let schema = json!({"type": "object", "required": ["email"]});
        let result = validate_required_args(
            &args(&[("email", json!("a@example.com"))]),
            &schema,
            "record_user_details",
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_blank_required_arg_is_missing() {
        let schema = json!({"type": "object", "required": ["question"]});
        let err = validate_required_args(
            &args(&[("question", json!("   "))]),
            &schema,
            "record_unknown_question",
        )
        .unwrap_err();
        assert_eq!(
            err,
            ToolError::InvalidArguments {
                tool: "record_unknown_question".to_string(),
                message: "Missing required parameter 'question'".to_string(),
            }
        );
    }

    #[test]
    fn test_null_required_arg_is_missing() {
        let schema = json!({"type": "object", "required": ["email"]});
        assert!(validate_required_args(&args(&[("email", Value::Null)]), &schema, "t").is_err());
    }

    #[test]
    fn test_optional_str_trims_and_drops_blank() {
        let map = args(&[("name", json!("  Ada ")), ("notes", json!(""))]);
        assert_eq!(optional_str(&map, "name"), Some("Ada"));
        assert_eq!(optional_str(&map, "notes"), None);
        assert_eq!(optional_str(&map, "missing"), None);
    }

    #[test]
    fn test_error_payload_shape() {
        let err = ToolError::NotFound("send_email".to_string());
        assert_eq!(err.to_payload(), json!({"error": "Unknown tool: send_email"}));
        assert_eq!(err.tool_name(), "send_email");
        assert_eq!(ToolError::NotFound(" ".to_string()).tool_name(), "<unnamed>");
    }

    #[test]
    fn test_recorded_outcome_content() {
        let outcome = ToolOutcome::recorded();
        assert!(outcome.success);
        assert_eq!(outcome.to_content(), r#"{"recorded":"ok"}"#);
    }
}
