//! OpenAI-compatible chat-completions client
//!
//! Retries stay inside a single completion request (network errors, 429, 5xx). A request
//! is retried only before any response reached the conversation loop, so tool side effects
//! can never be repeated by this layer.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::providers::{LlmMessage, LlmProvider, LlmResponse, LlmToolCall, ProviderError};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
    error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct WireError {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
    code: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    api_key: String,
    base_url: String,
    default_model: String,
    timeout: Duration,
    max_retries: u32,
    client: Client,
}

impl OpenAiProvider {
    pub fn try_new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        default_model: impl Into<String>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_model: default_model.into(),
            timeout,
            max_retries,
            client,
        })
    }

    fn build_request(
        &self,
        messages: Vec<LlmMessage>,
        tools: Vec<serde_json::Value>,
        model: &str,
    ) -> ChatRequest {
        let messages = messages
            .into_iter()
            .map(|msg| WireMessage {
                role: msg.role.as_str().to_string(),
                content: (!msg.content.is_empty()).then_some(msg.content),
                tool_calls: msg.tool_calls.map(|calls| {
                    calls
                        .into_iter()
                        .map(|call| WireToolCall {
                            id: call.id,
                            call_type: "function".to_string(),
                            function: WireFunction {
                                name: call.name,
                                arguments: call.arguments,
                            },
                        })
                        .collect()
                }),
                tool_call_id: msg.tool_call_id,
            })
            .collect();

        let tool_choice = (!tools.is_empty()).then_some("auto");
        ChatRequest {
            model: model.to_string(),
            messages,
            tools,
            tool_choice,
        }
    }

    fn parse_response(&self, response: ChatResponse) -> Result<LlmResponse, ProviderError> {
        if let Some(error) = response.error {
            return Err(ProviderError::provider(
                error.message,
                error.code.or(error.error_type),
            ));
        }

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::provider("No response choices returned", None::<&str>))?;

        let tool_calls = choice.message.tool_calls.map(|calls| {
            calls
                .into_iter()
                .map(|call| LlmToolCall::new(call.id, call.function.name, call.function.arguments))
                .collect()
        });

        let mut parsed = LlmResponse::new(choice.message.content.unwrap_or_default());
        parsed.tool_calls = tool_calls;
        if let Some(usage) = response.usage {
            parsed = parsed.with_tokens(usage.prompt_tokens, usage.completion_tokens);
        }
        Ok(parsed)
    }

    fn backoff(attempt: u32) -> Duration {
        Duration::from_millis(500 * 2_u64.pow(attempt.saturating_sub(1).min(4)))
    }

    async fn send_with_retry(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let max_attempts = self.max_retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(attempt = attempt, url = %url, "Sending chat completion request");

            let sent = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(request)
                .send()
                .await;

            let error = match sent {
                Ok(resp) => {
                    let status = resp.status();
                    match status {
                        StatusCode::OK => {
                            return resp.json::<ChatResponse>().await.map_err(|e| {
                                ProviderError::serialization(format!(
                                    "Failed to parse response: {}",
                                    e
                                ))
                            });
                        }
                        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                            let body = resp.text().await.unwrap_or_default();
                            return Err(ProviderError::auth(format!(
                                "Authentication failed ({}): {}",
                                status, body
                            )));
                        }
                        StatusCode::TOO_MANY_REQUESTS => {
                            let retry_after = resp
                                .headers()
                                .get(reqwest::header::RETRY_AFTER)
                                .and_then(|v| v.to_str().ok())
                                .and_then(|v| v.parse::<u64>().ok());
                            let body = resp.text().await.unwrap_or_default();
                            ProviderError::rate_limit(body, retry_after)
                        }
                        status if status.is_server_error() => {
                            let body = resp.text().await.unwrap_or_default();
                            ProviderError::provider(
                                format!("Server error ({}): {}", status, body),
                                Some(status.as_u16().to_string()),
                            )
                        }
                        status => {
                            let body = resp.text().await.unwrap_or_default();
                            return Err(ProviderError::invalid_request(format!(
                                "Client error ({}): {}",
                                status, body
                            )));
                        }
                    }
                }
                Err(e) if e.is_timeout() => ProviderError::timeout(self.timeout.as_secs()),
                Err(e) if e.is_connect() => {
                    ProviderError::network(format!("Connection failed: {}", e))
                }
                Err(e) => ProviderError::network(format!("Request failed: {}", e)),
            };

            let transient = error.is_retryable() || matches!(error, ProviderError::Provider { .. });
            if !transient || attempt >= max_attempts {
                return Err(error);
            }

            let delay = match &error {
                ProviderError::RateLimit {
                    retry_after: Some(secs),
                    ..
                } => Duration::from_secs(*secs),
                _ => Self::backoff(attempt),
            };
            warn!(
                attempt = attempt,
                max_attempts = max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Chat completion failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat(
        &self,
        messages: Vec<LlmMessage>,
        tools: Vec<serde_json::Value>,
        model: &str,
    ) -> Result<LlmResponse, ProviderError> {
        debug!(
            model = model,
            message_count = messages.len(),
            tool_count = tools.len(),
            "Building chat completion request"
        );

        let request = self.build_request(messages, tools, model);
        let response = self.send_with_retry(&request).await?;
        let parsed = self.parse_response(response)?;

        info!(
            model = model,
            has_tool_calls = parsed.has_tool_calls(),
            prompt_tokens = ?parsed.prompt_tokens,
            completion_tokens = ?parsed.completion_tokens,
            "chat_completion"
        );
        Ok(parsed)
    }

    fn default_model(&self) -> String {
        self.default_model.clone()
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::LlmRole;
    use serde_json::json;

    fn provider() -> OpenAiProvider {
        OpenAiProvider::try_new(
            "sk-test",
            "https://api.openai.com/v1/",
            DEFAULT_MODEL,
            Duration::from_secs(5),
            0,
        )
        .unwrap()
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        assert_eq!(provider().base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn test_build_request_maps_tool_messages() {
        let messages = vec![
            LlmMessage::system("persona"),
            LlmMessage::user("my email is a@b.no"),
            LlmMessage::assistant_tool_calls(
                "",
                vec![LlmToolCall::new(
                    "call_1",
                    "record_user_details",
                    r#"{"email":"a@b.no"}"#,
                )],
            ),
            LlmMessage::tool_result("call_1", r#"{"recorded":"ok"}"#),
        ];
        let request = provider().build_request(messages, vec![json!({"type": "function"})], "m");
        let body = serde_json::to_value(&request).unwrap();

        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["messages"][2]["tool_calls"][0]["type"], "function");
        assert!(body["messages"][2].get("content").is_none());
        assert_eq!(body["messages"][3]["tool_call_id"], "call_1");
        assert_eq!(body["messages"][3]["role"], LlmRole::Tool.as_str());
    }

    #[test]
    fn test_build_request_without_tools_omits_tool_fields() {
        let request = provider().build_request(vec![LlmMessage::user("hi")], vec![], "m");
        let body = serde_json::to_value(&request).unwrap();
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
    }

    #[test]
    fn test_parse_response_with_tool_calls_and_usage() {
        let raw = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {
                            "name": "record_unknown_question",
                            "arguments": "{\"question\":\"q\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 4, "total_tokens": 14}
        });
        let response: ChatResponse = serde_json::from_value(raw).unwrap();
        let parsed = provider().parse_response(response).unwrap();

        assert!(parsed.has_tool_calls());
        assert_eq!(parsed.content, "");
        assert_eq!(parsed.total_tokens(), Some(14));
        let calls = parsed.tool_calls.unwrap();
        assert_eq!(calls[0].name, "record_unknown_question");
    }

    #[test]
    fn test_parse_response_api_error() {
        let raw = json!({
            "error": {"message": "model overloaded", "type": "server_error", "code": null}
        });
        let response: ChatResponse = serde_json::from_value(raw).unwrap();
        let err = provider().parse_response(response).unwrap_err();
        assert!(matches!(err, ProviderError::Provider { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_network_error() {
        let provider = OpenAiProvider::try_new(
            "sk-test",
            "http://127.0.0.1:1/v1",
            DEFAULT_MODEL,
            Duration::from_secs(2),
            0,
        )
        .unwrap();
        let err = provider
            .chat(vec![LlmMessage::user("hi")], vec![], DEFAULT_MODEL)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Network { .. } | ProviderError::Timeout { .. }
        ));
    }
}
