//! Transcript forwarding to an HTTP endpoint

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::{SinkError, SinkHealth, TranscriptEntry, TranscriptSink};

/// POSTs each entry as JSON
pub struct WebhookSink {
    url: String,
    client: Client,
}

impl WebhookSink {
    pub fn try_new(url: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Remote {
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl TranscriptSink for WebhookSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn append(&self, entry: &TranscriptEntry) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.url)
            .json(entry)
            .send()
            .await
            .map_err(|e| SinkError::Remote {
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SinkError::Remote {
                message: format!("endpoint answered {}", status),
            })
        }
    }

    /// Health is configuration-only; probing the endpoint would archive a fake entry
    async fn health(&self) -> SinkHealth {
        SinkHealth {
            backend: self.name(),
            enabled: true,
            reachable: true,
            error: None,
        }
    }
}
