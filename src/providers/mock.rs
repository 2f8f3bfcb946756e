//! Scripted model backend
//!
//! Replays a queue of steps (reply, error, or stall) and records every request it saw, so
//! conversation-loop tests can assert what was sent and how often.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::providers::{LlmMessage, LlmProvider, LlmResponse, ProviderError};

#[derive(Debug, Clone)]
pub enum Step {
    Reply(LlmResponse),
    Fail(ProviderError),
    /// Sleeps, then replies; used to trip call timeouts
    Stall(Duration, LlmResponse),
}

/// Request captured by the scripted provider
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<LlmMessage>,
    pub tool_names: Vec<String>,
}

pub struct ScriptedProvider {
    steps: Mutex<VecDeque<Step>>,
    fallback: LlmResponse,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedProvider {
    /// Provider that answers every call with `reply`
    pub fn replying(reply: impl Into<String>) -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            fallback: LlmResponse::new(reply),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Provider that plays `steps` in order, then answers with a fixed reply
    pub fn with_steps(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            fallback: LlmResponse::new("Scripted reply"),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn next_step(&self) -> Step {
        self.steps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .unwrap_or_else(|| Step::Reply(self.fallback.clone()))
    }
}

fn tool_name(definition: &serde_json::Value) -> String {
    definition["function"]["name"]
        .as_str()
        .unwrap_or_default()
        .to_string()
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat(
        &self,
        messages: Vec<LlmMessage>,
        tools: Vec<serde_json::Value>,
        _model: &str,
    ) -> Result<LlmResponse, ProviderError> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(RecordedCall {
                messages,
                tool_names: tools.iter().map(tool_name).collect(),
            });

        match self.next_step() {
            Step::Reply(response) => Ok(response),
            Step::Fail(error) => Err(error),
            Step::Stall(delay, response) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            }
        }
    }

    fn default_model(&self) -> String {
        "scripted-model".to_string()
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}
