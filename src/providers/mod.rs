//! Model backend abstraction
//!
//! `LlmProvider` is the seam between the conversation loop and a chat-completion service.
//! `OpenAiProvider` speaks the OpenAI chat-completions protocol with function calling;
//! `mock::ScriptedProvider` replays canned steps for tests.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod error;
pub mod mock;
pub mod openai;

pub use error::ProviderError;
pub use openai::OpenAiProvider;

/// Message in the context sent to the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmMessage {
    pub role: LlmRole,
    pub content: String,
    /// Tool calls requested by the assistant in this message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<LlmToolCall>>,
    /// Call this tool-result message answers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl LlmMessage {
    pub fn new(role: LlmRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(LlmRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(LlmRole::User, content)
    }

    /// Assistant turn that requested tools
    pub fn assistant_tool_calls(content: impl Into<String>, calls: Vec<LlmToolCall>) -> Self {
        Self {
            tool_calls: Some(calls),
            ..Self::new(LlmRole::Assistant, content)
        }
    }

    /// Result of one tool call, fed back to the model
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::new(LlmRole::Tool, content)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmRole {
    System,
    User,
    Assistant,
    Tool,
}

impl LlmRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmRole::System => "system",
            LlmRole::User => "user",
            LlmRole::Assistant => "assistant",
            LlmRole::Tool => "tool",
        }
    }
}

impl fmt::Display for LlmRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tool call requested by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmToolCall {
    pub id: String,
    pub name: String,
    /// JSON-encoded arguments, exactly as the model produced them
    pub arguments: String,
}

impl LlmToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmResponse {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<LlmToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
}

impl LlmResponse {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: None,
            prompt_tokens: None,
            completion_tokens: None,
        }
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<LlmToolCall>) -> Self {
        self.tool_calls = Some(tool_calls);
        self
    }

    pub fn with_tokens(mut self, prompt: u32, completion: u32) -> Self {
        self.prompt_tokens = Some(prompt);
        self.completion_tokens = Some(completion);
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|c| !c.is_empty())
    }

    pub fn total_tokens(&self) -> Option<u32> {
        match (self.prompt_tokens, self.completion_tokens) {
            (Some(p), Some(c)) => Some(p + c),
            _ => None,
        }
    }
}

/// Chat-completion backend
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Sends the context and the tool definitions (OpenAI function format) to the model
    async fn chat(
        &self,
        messages: Vec<LlmMessage>,
        tools: Vec<serde_json::Value>,
        model: &str,
    ) -> Result<LlmResponse, ProviderError>;

    fn default_model(&self) -> String;

    fn provider_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_result_message_carries_call_id() {
        let msg = LlmMessage::tool_result("call_1", r#"{"recorded":"ok"}"#);
        assert_eq!(msg.role, LlmRole::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_assistant_tool_calls_message() {
        let call = LlmToolCall::new("call_1", "record_unknown_question", "{}");
        let msg = LlmMessage::assistant_tool_calls("", vec![call.clone()]);
        assert_eq!(msg.role, LlmRole::Assistant);
        assert_eq!(msg.tool_calls, Some(vec![call]));
    }

    #[test]
    fn test_has_tool_calls_ignores_empty_list() {
        let response = LlmResponse::new("done").with_tool_calls(vec![]);
        assert!(!response.has_tool_calls());
    }

    #[test]
    fn test_total_tokens() {
        let response = LlmResponse::new("x").with_tokens(120, 30);
        assert_eq!(response.total_tokens(), Some(150));
        assert_eq!(LlmResponse::new("x").total_tokens(), None);
    }

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&LlmRole::Tool).unwrap();
        assert_eq!(json, "\"tool\"");
    }
}
