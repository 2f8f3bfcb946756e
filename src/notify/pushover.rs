//! Pushover delivery over reqwest

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{NotifyError, Notifier};

pub const PUSHOVER_ENDPOINT: &str = "https://api.pushover.net/1/messages.json";

#[derive(Debug, Clone)]
pub struct PushoverNotifier {
    token: String,
    user: String,
    endpoint: String,
    timeout: Duration,
    client: Client,
}

impl PushoverNotifier {
    pub fn try_new(
        token: impl Into<String>,
        user: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            token: token.into(),
            user: user.into(),
            endpoint: PUSHOVER_ENDPOINT.to_string(),
            timeout,
            client,
        })
    }

    /// Points the notifier at another endpoint (self-hosted relays, tests)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// Text pushed to the operator's device
fn message_text(event_type: &str, payload: &Value) -> String {
    payload
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("{event_type}: {payload}"))
}

#[async_trait]
impl Notifier for PushoverNotifier {
    fn name(&self) -> &'static str {
        "pushover"
    }

    async fn notify(&self, event_type: &str, payload: &Value) -> Result<(), NotifyError> {
        let message = message_text(event_type, payload);
        let form = [
            ("token", self.token.as_str()),
            ("user", self.user.as_str()),
            ("message", message.as_str()),
        ];

        let response = self
            .client
            .post(&self.endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NotifyError::Timeout {
                        millis: self.timeout.as_millis() as u64,
                    }
                } else {
                    NotifyError::network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!(event_type = event_type, "Pushover accepted message");
        Ok(())
    }
}
