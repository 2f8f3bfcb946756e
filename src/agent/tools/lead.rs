use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

use crate::agent::tools::{Tool, ToolContext, ToolOutcome, ToolResult, optional_str};
use crate::notify::BestEffortNotifier;

pub const NAME_NOT_PROVIDED: &str = "Name not provided";
pub const NOTES_NOT_PROVIDED: &str = "not provided";

/// Records a visitor who wants to be contacted
///
/// Sends the contact details to the operator's notifier. The acknowledgment does not depend on
/// whether the notification went through.
pub struct RecordUserDetailsTool {
    notifier: Arc<BestEffortNotifier>,
}

impl RecordUserDetailsTool {
    pub fn new(notifier: Arc<BestEffortNotifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait::async_trait]
impl Tool for RecordUserDetailsTool {
    fn name(&self) -> &str {
        "record_user_details"
    }

    fn description(&self) -> &str {
        "Use this tool to record that a user is interested in being in touch and provided an \
         email address"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "email": {
                    "type": "string",
                    "description": "The email address of this user"
                },
                "name": {
                    "type": "string",
                    "description": "The user's name, if they provided it"
                },
                "notes": {
                    "type": "string",
                    "description": "Any additional information about the conversation that's worth recording to give context"
                }
            },
            "required": ["email"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        args: HashMap<String, Value>,
        ctx: &ToolContext,
    ) -> ToolResult<ToolOutcome> {
        // Presence is checked by the dispatcher against `required`
        let email = optional_str(&args, "email").unwrap_or_default();
        let name = optional_str(&args, "name").unwrap_or(NAME_NOT_PROVIDED);
        let notes = optional_str(&args, "notes").unwrap_or(NOTES_NOT_PROVIDED);

        let payload = json!({
            "message": format!("Recording {} with email {} and notes {}", name, email, notes),
            "session_id": ctx.session_id,
            "email": email,
            "name": name,
            "notes": notes,
        });
        let delivery = self.notifier.deliver("user_details", &payload).await;

        tracing::info!(
            session_id = %ctx.session_id,
            delivery = ?delivery,
            "user_details_recorded"
        );

        Ok(ToolOutcome::recorded())
    }
}
