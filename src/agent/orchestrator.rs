//! One visitor turn, end to end
//!
//! validate -> resolve session -> rate check -> context -> model/tool rounds -> persist
//!
//! A denied rate check answers with a localized notice and never reaches the model. Any model
//! error, timeout or runaway tool loop ends the turn with a localized apology and leaves the
//! session history as it was.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::agent::context::{ContextBuilder, HistoryEntry};
use crate::agent::language::{detect_language, fallback_message, rate_limit_message};
use crate::agent::metrics::{TARGET_TURN_P95_MS, TurnMetrics, TurnOutcome};
use crate::agent::tools::{ToolContext, ToolDispatcher, ToolOutcome};
use crate::providers::{LlmMessage, LlmProvider, LlmToolCall, ProviderError};
use crate::ratelimit::RateLimiter;
use crate::session::{Language, Message, Session, SessionStore};
use crate::transcript::TranscriptRecorder;
use crate::utils::{ParleyError, Result};

pub const DEFAULT_MAX_TOOL_ROUNDS: u32 = 5;
pub const DEFAULT_MODEL_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_MESSAGE_CHARS: usize = 4_000;
pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(100);

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Model name; `None` uses the provider's default
    pub model: Option<String>,
    /// Bound on each model call, retries included
    pub model_timeout: Duration,
    /// Bound on all model and tool rounds of one turn, measured from the moment it arrives
    pub turn_timeout: Duration,
    /// Tool rounds allowed before the turn is abandoned
    pub max_tool_rounds: u32,
    pub max_message_chars: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            model: None,
            model_timeout: DEFAULT_MODEL_TIMEOUT,
            turn_timeout: DEFAULT_TURN_TIMEOUT,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            max_message_chars: DEFAULT_MAX_MESSAGE_CHARS,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub session_id: Option<String>,
    pub message: String,
    /// Client-held history, used as context instead of the stored one
    pub history: Option<Vec<HistoryEntry>>,
}

impl TurnRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_history(mut self, history: Vec<HistoryEntry>) -> Self {
        self.history = Some(history);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnReply {
    pub session_id: String,
    pub message: String,
    pub rate_limited: bool,
    pub language: Language,
    pub timestamp: DateTime<Utc>,
    pub outcome: TurnOutcome,
}

/// Why the model/tool rounds produced no answer
#[derive(Error, Debug)]
enum LoopFailure {
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("turn ran past its {0:?} deadline")]
    TurnDeadline(Duration),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("model still requested tools after {0} rounds")]
    RoundsExhausted(u32),

    #[error("model returned an empty reply")]
    EmptyReply,
}

impl LoopFailure {
    fn kind(&self) -> &'static str {
        match self {
            LoopFailure::Timeout(_) => "timeout",
            LoopFailure::TurnDeadline(_) => "turn_timeout",
            LoopFailure::Provider(e) => e.kind(),
            LoopFailure::RoundsExhausted(_) => "tool_rounds_exhausted",
            LoopFailure::EmptyReply => "empty_reply",
        }
    }
}

pub struct ConversationOrchestrator {
    sessions: Arc<SessionStore>,
    limiter: Arc<RateLimiter>,
    tools: Arc<ToolDispatcher>,
    provider: Arc<dyn LlmProvider>,
    context: ContextBuilder,
    transcripts: Arc<TranscriptRecorder>,
    metrics: Arc<TurnMetrics>,
    config: OrchestratorConfig,
}

impl ConversationOrchestrator {
    pub fn new(
        sessions: Arc<SessionStore>,
        limiter: Arc<RateLimiter>,
        tools: Arc<ToolDispatcher>,
        provider: Arc<dyn LlmProvider>,
        context: ContextBuilder,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            sessions,
            limiter,
            tools,
            provider,
            context,
            transcripts: Arc::new(TranscriptRecorder::disabled()),
            metrics: Arc::new(TurnMetrics::new()),
            config,
        }
    }

    pub fn with_transcripts(mut self, transcripts: Arc<TranscriptRecorder>) -> Self {
        self.transcripts = transcripts;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn tools(&self) -> &Arc<ToolDispatcher> {
        &self.tools
    }

    pub fn transcripts(&self) -> &Arc<TranscriptRecorder> {
        &self.transcripts
    }

    pub fn metrics(&self) -> &Arc<TurnMetrics> {
        &self.metrics
    }

    pub fn persona_name(&self) -> &str {
        &self.context.persona().name
    }

    fn model(&self) -> String {
        self.config
            .model
            .clone()
            .unwrap_or_else(|| self.provider.default_model())
    }

    /// Handles one visitor message
    ///
    /// Only validation and unrecoverable store failures are errors; rate limiting and model
    /// failures produce a normal reply.
    pub async fn handle_turn(&self, request: TurnRequest) -> Result<TurnReply> {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.config.turn_timeout;
        self.validate(&request.message)?;
        let user = Message::user(request.message.as_str());

        let language = detect_language(&request.message);
        let session = self.resolve_session(request.session_id.as_deref()).await?;
        let history_length = request
            .history
            .as_ref()
            .filter(|h| !h.is_empty())
            .map_or(session.history.len(), Vec::len);

        info!(
            session_id = %session.id,
            language = %language,
            history_length = history_length,
            "chat_request"
        );

        let admission = self
            .limiter
            .check_and_increment(&session.id, Utc::now())
            .await?;
        if !admission.allowed {
            return self
                .reject_rate_limited(&session.id, user, language, started)
                .await;
        }

        let context = self.context.build(
            &session,
            request.history.as_deref(),
            &request.message,
            language,
        );

        let rounds = self.run_model_rounds(&session.id, context, language);
        let outcome = tokio::time::timeout_at(deadline, rounds)
            .await
            .unwrap_or(Err(LoopFailure::TurnDeadline(self.config.turn_timeout)));

        match outcome {
            Ok(text) => {
                self.complete_turn(&session.id, user, text, language, started)
                    .await
            }
            Err(failure) => {
                self.fail_turn(&session.id, user, failure, language, started)
                    .await
            }
        }
    }

    fn validate(&self, message: &str) -> Result<()> {
        if message.trim().is_empty() {
            return Err(ParleyError::validation("Message is required"));
        }
        if message.chars().count() > self.config.max_message_chars {
            return Err(ParleyError::validation(format!(
                "Message exceeds {} characters",
                self.config.max_message_chars
            )));
        }
        Ok(())
    }

    /// Existing live session, or a fresh one with a new id
    async fn resolve_session(&self, requested: Option<&str>) -> Result<Session> {
        if let Some(id) = requested.map(str::trim).filter(|id| !id.is_empty()) {
            if let Some(session) = self.sessions.get(id).await? {
                return Ok(session);
            }
            debug!(requested_id = %id, "Unknown or expired session id, starting a new session");
        }
        self.sessions.create().await
    }

    async fn reject_rate_limited(
        &self,
        session_id: &str,
        user: Message,
        language: Language,
        started: Instant,
    ) -> Result<TurnReply> {
        let notice = rate_limit_message(language);
        self.sessions.touch(session_id).await?;

        let assistant = Message::assistant(notice);
        self.transcripts
            .record_turn(session_id, &user, &assistant, Some(language), true)
            .await;

        info!(session_id = %session_id, language = %language, "chat_rate_limited");
        self.metrics
            .record(TurnOutcome::RateLimited, started.elapsed());

        Ok(TurnReply {
            session_id: session_id.to_string(),
            message: notice.to_string(),
            rate_limited: true,
            language,
            timestamp: assistant.timestamp,
            outcome: TurnOutcome::RateLimited,
        })
    }

    async fn complete_turn(
        &self,
        session_id: &str,
        user: Message,
        reply: String,
        language: Language,
        started: Instant,
    ) -> Result<TurnReply> {
        let assistant = Message::assistant(reply);

        self.sessions
            .append_turn(session_id, user.clone(), assistant.clone(), Some(language))
            .await?;
        self.transcripts
            .record_turn(session_id, &user, &assistant, Some(language), false)
            .await;

        let elapsed = started.elapsed();
        self.metrics.record(TurnOutcome::Completed, elapsed);
        info!(
            session_id = %session_id,
            language = %language,
            duration_ms = elapsed.as_millis() as u64,
            reply_chars = assistant.content.chars().count(),
            "chat_response"
        );
        self.warn_if_slow();

        Ok(TurnReply {
            session_id: session_id.to_string(),
            message: assistant.content,
            rate_limited: false,
            language,
            timestamp: assistant.timestamp,
            outcome: TurnOutcome::Completed,
        })
    }

    async fn fail_turn(
        &self,
        session_id: &str,
        user: Message,
        failure: LoopFailure,
        language: Language,
        started: Instant,
    ) -> Result<TurnReply> {
        warn!(
            session_id = %session_id,
            kind = failure.kind(),
            error = %failure,
            "model_error"
        );

        let assistant = Message::assistant(fallback_message(language));
        self.transcripts
            .record_turn(session_id, &user, &assistant, Some(language), false)
            .await;
        self.metrics.record(TurnOutcome::Failed, started.elapsed());

        Ok(TurnReply {
            session_id: session_id.to_string(),
            message: assistant.content,
            rate_limited: false,
            language,
            timestamp: assistant.timestamp,
            outcome: TurnOutcome::Failed,
        })
    }

    /// Calls the model until it answers without tool calls
    ///
    /// Tool results are appended to the context between calls. A call id seen earlier in the
    /// turn is answered from the recorded outcome instead of being dispatched again.
    async fn run_model_rounds(
        &self,
        session_id: &str,
        mut context: Vec<LlmMessage>,
        language: Language,
    ) -> std::result::Result<String, LoopFailure> {
        let model = self.model();
        let definitions = self.tools.definitions();
        let ctx = ToolContext::new(session_id, Some(language));
        let mut executed: HashMap<String, ToolOutcome> = HashMap::new();
        let max_rounds = self.config.max_tool_rounds;

        for round in 0..=max_rounds {
            let call = self
                .provider
                .chat(context.clone(), definitions.clone(), &model);
            let response = tokio::time::timeout(self.config.model_timeout, call)
                .await
                .map_err(|_| LoopFailure::Timeout(self.config.model_timeout))??;

            if let Some(total) = response.total_tokens() {
                debug!(
                    session_id = %session_id,
                    round = round,
                    total_tokens = total,
                    "Model call completed"
                );
            }

            let calls = match response.tool_calls {
                Some(calls) if !calls.is_empty() => calls,
                _ => {
                    if response.content.trim().is_empty() {
                        return Err(LoopFailure::EmptyReply);
                    }
                    return Ok(response.content);
                }
            };

            if round == max_rounds {
                break;
            }

            debug!(
                session_id = %session_id,
                round = round + 1,
                tool_count = calls.len(),
                "Model requested tools"
            );
            context.push(LlmMessage::assistant_tool_calls(
                response.content,
                calls.clone(),
            ));

            // New call ids run concurrently; results go back in the order the model asked
            let mut pending: Vec<&LlmToolCall> = Vec::new();
            for call in &calls {
                if executed.contains_key(&call.id) || pending.iter().any(|p| p.id == call.id) {
                    debug!(
                        session_id = %session_id,
                        tool = %call.name,
                        call_id = %call.id,
                        "Tool call already executed this turn, reusing result"
                    );
                } else {
                    pending.push(call);
                }
            }
            let outcomes = join_all(
                pending
                    .iter()
                    .map(|call| self.tools.dispatch(&call.name, &call.arguments, &ctx)),
            )
            .await;
            for (call, outcome) in pending.iter().zip(outcomes) {
                executed.insert(call.id.clone(), outcome);
            }

            for call in calls {
                let content = executed
                    .get(&call.id)
                    .map(ToolOutcome::to_content)
                    .unwrap_or_default();
                context.push(LlmMessage::tool_result(call.id, content));
            }
        }

        Err(LoopFailure::RoundsExhausted(max_rounds))
    }

    fn warn_if_slow(&self) {
        let snapshot = self.metrics.snapshot();
        if snapshot.p95_ms.is_some_and(|p95| p95 > TARGET_TURN_P95_MS) {
            warn!(
                p95_ms = snapshot.p95_ms,
                target_ms = TARGET_TURN_P95_MS,
                samples = snapshot.samples,
                "Turn latency 95th percentile exceeds target"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::context::Persona;
    use crate::agent::tools::testing::RecordingNotifier;
    use crate::notify::BestEffortNotifier;
    use crate::providers::mock::{ScriptedProvider, Step};
    use crate::providers::{LlmResponse, LlmRole, LlmToolCall};

    struct Harness {
        orchestrator: ConversationOrchestrator,
        provider: Arc<ScriptedProvider>,
        notifier: Arc<RecordingNotifier>,
        sessions: Arc<SessionStore>,
    }

    fn harness_with(
        provider: ScriptedProvider,
        max_requests: u32,
        config: OrchestratorConfig,
    ) -> Harness {
        let sessions = Arc::new(SessionStore::in_memory(Duration::from_secs(3600)));
        let limiter = Arc::new(RateLimiter::new(
            sessions.backend(),
            Duration::from_secs(60),
            max_requests,
        ));
        let notifier = Arc::new(RecordingNotifier::default());
        let tools = Arc::new(ToolDispatcher::with_default_tools(Arc::new(
            BestEffortNotifier::new(notifier.clone(), Duration::from_secs(1)),
        )));
        let provider = Arc::new(provider);
        let persona = Arc::new(Persona::new("Kari Nordmann", "", ""));
        let orchestrator = ConversationOrchestrator::new(
            sessions.clone(),
            limiter,
            tools,
            provider.clone(),
            ContextBuilder::new(persona),
            config,
        );
        Harness {
            orchestrator,
            provider,
            notifier,
            sessions,
        }
    }

    fn harness(provider: ScriptedProvider) -> Harness {
        harness_with(provider, 8, OrchestratorConfig::default())
    }

    fn question_call(id: &str) -> LlmToolCall {
        LlmToolCall::new(
            id,
            "record_unknown_question",
            r#"{"question":"Favourite colour?"}"#,
        )
    }

    #[tokio::test]
    async fn test_new_session_turn_is_stored() {
        let h = harness(ScriptedProvider::replying("Hello there!"));
        let reply = h
            .orchestrator
            .handle_turn(TurnRequest::new("Hello, what do you do?"))
            .await
            .unwrap();

        assert!(!reply.rate_limited);
        assert_eq!(reply.message, "Hello there!");
        assert_eq!(reply.language, Language::English);
        assert_eq!(reply.outcome, TurnOutcome::Completed);

        let session = h.sessions.get(&reply.session_id).await.unwrap().unwrap();
        assert_eq!(session.history.len(), 2);
        assert_eq!(session.history[0].content, "Hello, what do you do?");
        assert_eq!(session.history[1].content, "Hello there!");
        assert_eq!(session.language_hint, Some(Language::English));
    }

    #[tokio::test]
    async fn test_existing_session_history_reaches_model() {
        let h = harness(ScriptedProvider::replying("ok"));
        let first = h
            .orchestrator
            .handle_turn(TurnRequest::new("Hei"))
            .await
            .unwrap();
        h.orchestrator
            .handle_turn(TurnRequest::new("Takk").in_session(&first.session_id))
            .await
            .unwrap();

        let calls = h.provider.calls();
        let second: Vec<&str> = calls[1].messages[2..]
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(second, ["Hei", "ok", "Takk"]);
    }

    #[tokio::test]
    async fn test_unknown_session_id_gets_new_id() {
        let h = harness(ScriptedProvider::replying("ok"));
        let reply = h
            .orchestrator
            .handle_turn(TurnRequest::new("Hei").in_session("not-a-real-session"))
            .await
            .unwrap();
        assert_ne!(reply.session_id, "not-a-real-session");
    }

    #[tokio::test]
    async fn test_blank_message_is_rejected_before_any_call() {
        let h = harness(ScriptedProvider::replying("ok"));
        let err = h
            .orchestrator
            .handle_turn(TurnRequest::new("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, ParleyError::Validation { .. }));
        assert_eq!(err.to_string(), "Message is required");
        assert_eq!(h.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_oversized_message_is_rejected() {
        let config = OrchestratorConfig {
            max_message_chars: 10,
            ..OrchestratorConfig::default()
        };
        let h = harness_with(ScriptedProvider::replying("ok"), 8, config);
        let err = h
            .orchestrator
            .handle_turn(TurnRequest::new("this is far too long"))
            .await
            .unwrap_err();
        assert!(matches!(err, ParleyError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_rate_limited_turn_skips_model_and_history() {
        let h = harness_with(
            ScriptedProvider::replying("ok"),
            1,
            OrchestratorConfig::default(),
        );
        let first = h
            .orchestrator
            .handle_turn(TurnRequest::new("Hello"))
            .await
            .unwrap();
        let second = h
            .orchestrator
            .handle_turn(TurnRequest::new("Hello again, please").in_session(&first.session_id))
            .await
            .unwrap();

        assert!(second.rate_limited);
        assert_eq!(second.message, rate_limit_message(Language::English));
        assert_eq!(second.session_id, first.session_id);
        assert_eq!(h.provider.call_count(), 1);

        let session = h.sessions.get(&first.session_id).await.unwrap().unwrap();
        assert_eq!(session.history.len(), 2);
        assert_eq!(h.orchestrator.metrics().snapshot().rate_limited, 1);
    }

    #[tokio::test]
    async fn test_tool_call_then_final_reply() {
        let provider = ScriptedProvider::with_steps([
            Step::Reply(LlmResponse::new("").with_tool_calls(vec![question_call("call_1")])),
            Step::Reply(LlmResponse::new("I have noted your question.")),
        ]);
        let h = harness(provider);
        let reply = h
            .orchestrator
            .handle_turn(TurnRequest::new("What is your favourite colour?"))
            .await
            .unwrap();

        assert_eq!(reply.message, "I have noted your question.");
        assert_eq!(h.notifier.messages(), ["Recording Favourite colour?"]);

        let calls = h.provider.calls();
        assert_eq!(calls.len(), 2);
        let tool_result = calls[1].messages.last().unwrap();
        assert_eq!(tool_result.role, LlmRole::Tool);
        assert_eq!(tool_result.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(tool_result.content, r#"{"recorded":"ok"}"#);
    }

    #[tokio::test]
    async fn test_unknown_tool_does_not_abort_turn() {
        let provider = ScriptedProvider::with_steps([
            Step::Reply(LlmResponse::new("").with_tool_calls(vec![LlmToolCall::new(
                "c1", "send_sms", "{}",
            )])),
            Step::Reply(LlmResponse::new("Done.")),
        ]);
        let h = harness(provider);
        let reply = h
            .orchestrator
            .handle_turn(TurnRequest::new("Hello"))
            .await
            .unwrap();

        assert_eq!(reply.outcome, TurnOutcome::Completed);
        let calls = h.provider.calls();
        assert!(
            calls[1]
                .messages
                .last()
                .unwrap()
                .content
                .contains("Unknown tool: send_sms")
        );
    }

    #[tokio::test]
    async fn test_model_failure_after_tool_call_does_not_repeat_tool() {
        let provider = ScriptedProvider::with_steps([
            Step::Reply(LlmResponse::new("").with_tool_calls(vec![question_call("call_1")])),
            Step::Fail(ProviderError::network("connection reset")),
        ]);
        let h = harness(provider);
        let reply = h
            .orchestrator
            .handle_turn(TurnRequest::new("Hello, what is this?"))
            .await
            .unwrap();

        assert_eq!(reply.message, fallback_message(Language::English));
        assert_eq!(reply.outcome, TurnOutcome::Failed);
        assert_eq!(h.notifier.messages().len(), 1);
        assert_eq!(h.provider.call_count(), 2);

        let session = h.sessions.get(&reply.session_id).await.unwrap().unwrap();
        assert!(session.history.is_empty());
    }

    #[tokio::test]
    async fn test_repeated_call_id_is_not_dispatched_twice() {
        let provider = ScriptedProvider::with_steps([
            Step::Reply(LlmResponse::new("").with_tool_calls(vec![question_call("call_1")])),
            Step::Reply(LlmResponse::new("").with_tool_calls(vec![question_call("call_1")])),
            Step::Reply(LlmResponse::new("Noted.")),
        ]);
        let h = harness(provider);
        let reply = h
            .orchestrator
            .handle_turn(TurnRequest::new("Hello"))
            .await
            .unwrap();

        assert_eq!(reply.message, "Noted.");
        assert_eq!(h.notifier.messages().len(), 1);
        assert_eq!(h.provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_parallel_calls_answered_in_request_order() {
        let lead = LlmToolCall::new(
            "call_a",
            "record_user_details",
            r#"{"email":"ada@example.com"}"#,
        );
        let provider = ScriptedProvider::with_steps([
            Step::Reply(LlmResponse::new("").with_tool_calls(vec![
                lead,
                question_call("call_b"),
                question_call("call_b"),
            ])),
            Step::Reply(LlmResponse::new("Thanks!")),
        ]);
        let h = harness(provider);
        h.orchestrator
            .handle_turn(TurnRequest::new("Hello"))
            .await
            .unwrap();

        assert_eq!(h.notifier.messages().len(), 2);
        let calls = h.provider.calls();
        let ids: Vec<Option<&str>> = calls[1]
            .messages
            .iter()
            .filter(|m| m.role == LlmRole::Tool)
            .map(|m| m.tool_call_id.as_deref())
            .collect();
        assert_eq!(ids, [Some("call_a"), Some("call_b"), Some("call_b")]);
    }

    #[tokio::test]
    async fn test_tool_rounds_are_bounded() {
        let looping: Vec<Step> = (0..10)
            .map(|i| {
                Step::Reply(
                    LlmResponse::new("")
                        .with_tool_calls(vec![question_call(&format!("call_{}", i))]),
                )
            })
            .collect();
        let config = OrchestratorConfig {
            max_tool_rounds: 2,
            ..OrchestratorConfig::default()
        };
        let h = harness_with(ScriptedProvider::with_steps(looping), 8, config);
        let reply = h
            .orchestrator
            .handle_turn(TurnRequest::new("Hei"))
            .await
            .unwrap();

        assert_eq!(reply.outcome, TurnOutcome::Failed);
        assert_eq!(reply.message, fallback_message(Language::Norwegian));
        assert_eq!(h.provider.call_count(), 3);
        assert_eq!(h.notifier.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_model_timeout_yields_fallback() {
        let provider = ScriptedProvider::with_steps([Step::Stall(
            Duration::from_millis(500),
            LlmResponse::new("too late"),
        )]);
        let config = OrchestratorConfig {
            model_timeout: Duration::from_millis(20),
            ..OrchestratorConfig::default()
        };
        let h = harness_with(provider, 8, config);
        let reply = h
            .orchestrator
            .handle_turn(TurnRequest::new("Hei"))
            .await
            .unwrap();

        assert_eq!(reply.message, fallback_message(Language::Norwegian));
        assert!(!reply.rate_limited);
        let session = h.sessions.get(&reply.session_id).await.unwrap().unwrap();
        assert!(session.history.is_empty());
    }

    #[tokio::test]
    async fn test_empty_model_reply_is_a_failure() {
        let h = harness(ScriptedProvider::replying("  "));
        let reply = h
            .orchestrator
            .handle_turn(TurnRequest::new("Hei"))
            .await
            .unwrap();
        assert_eq!(reply.outcome, TurnOutcome::Failed);
    }

    #[tokio::test]
    async fn test_client_history_is_context_only() {
        let h = harness(ScriptedProvider::replying("ok"));
        let reply = h
            .orchestrator
            .handle_turn(TurnRequest::new("Hello").with_history(vec![
                HistoryEntry::new(crate::session::Role::User, "earlier question"),
                HistoryEntry::new(crate::session::Role::Assistant, "earlier answer"),
            ]))
            .await
            .unwrap();

        assert!(
            h.provider.calls()[0]
                .messages
                .iter()
                .any(|m| m.content == "earlier question")
        );
        let session = h.sessions.get(&reply.session_id).await.unwrap().unwrap();
        assert_eq!(session.history.len(), 2);
        assert_eq!(session.history[0].content, "Hello");
    }

    #[tokio::test]
    async fn test_turn_deadline_bounds_slow_tool_rounds() {
        let slow_tool_round = || {
            Step::Stall(
                Duration::from_millis(60),
                LlmResponse::new("").with_tool_calls(vec![question_call("call_1")]),
            )
        };
        let provider = ScriptedProvider::with_steps([
            slow_tool_round(),
            slow_tool_round(),
            Step::Stall(Duration::from_millis(60), LlmResponse::new("too late")),
        ]);
        let config = OrchestratorConfig {
            model_timeout: Duration::from_millis(100),
            turn_timeout: Duration::from_millis(150),
            ..OrchestratorConfig::default()
        };
        let h = harness_with(provider, 8, config);
        let reply = h
            .orchestrator
            .handle_turn(TurnRequest::new("What have you worked on?"))
            .await
            .unwrap();

        assert_eq!(reply.outcome, TurnOutcome::Failed);
        assert_eq!(reply.message, fallback_message(Language::English));
        assert_eq!(h.orchestrator.metrics().snapshot().failed, 1);
        let session = h.sessions.get(&reply.session_id).await.unwrap().unwrap();
        assert!(session.history.is_empty());
    }

    #[tokio::test]
    async fn test_user_message_is_stamped_on_arrival() {
        let provider = ScriptedProvider::with_steps([Step::Stall(
            Duration::from_millis(80),
            LlmResponse::new("Worth the wait."),
        )]);
        let h = harness(provider);
        let reply = h
            .orchestrator
            .handle_turn(TurnRequest::new("Hello there"))
            .await
            .unwrap();

        let session = h.sessions.get(&reply.session_id).await.unwrap().unwrap();
        let (user, assistant) = (&session.history[0], &session.history[1]);
        let gap = assistant.timestamp.signed_duration_since(user.timestamp);
        assert!(gap.num_milliseconds() >= 80, "gap was {gap}");
    }
}
