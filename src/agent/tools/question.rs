use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

use crate::agent::tools::{Tool, ToolContext, ToolOutcome, ToolResult, optional_str};
use crate::notify::BestEffortNotifier;

/// Records a question the assistant could not answer, so the operator can fill the gap
pub struct RecordUnknownQuestionTool {
    notifier: Arc<BestEffortNotifier>,
}

impl RecordUnknownQuestionTool {
    pub fn new(notifier: Arc<BestEffortNotifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait::async_trait]
impl Tool for RecordUnknownQuestionTool {
    fn name(&self) -> &str {
        "record_unknown_question"
    }

    fn description(&self) -> &str {
        "Always use this tool to record any question that couldn't be answered as you didn't \
         know the answer"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "The question that couldn't be answered"
                }
            },
            "required": ["question"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        args: HashMap<String, Value>,
        ctx: &ToolContext,
    ) -> ToolResult<ToolOutcome> {
        let question = optional_str(&args, "question").unwrap_or_default();

        let payload = json!({
            "message": format!("Recording {}", question),
            "session_id": ctx.session_id,
            "question": question,
            "language": ctx.language.map(|l| l.code()),
        });
        let delivery = self.notifier.deliver("unknown_question", &payload).await;

        tracing::info!(
            session_id = %ctx.session_id,
            delivery = ?delivery,
            "unknown_question_recorded"
        );

        Ok(ToolOutcome::recorded())
    }
}
