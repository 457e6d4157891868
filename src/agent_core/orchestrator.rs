//! The tool-calling loop for one user turn.
//!
//! Flow for both variants:
//! 1. **Gate**: refuse early (no network) when a required credential is missing.
//! 2. **Prepare**: window and repair history, build prompt parts (+ attachment).
//! 3. **Loop**: send, inspect for tool calls, execute the first one, feed the
//!    result back, up to `max_tool_rounds` executions.
//! 4. **Retry**: overload/rate-limit failures restart the whole turn from a
//!    fresh chat session after exponential backoff.
//!
//! The buffering variant returns the final text. The streaming variant forwards
//! text fragments as `chunk` events and finishes with exactly one `end` or
//! `error` event for its request id.

use std::path::PathBuf;
use std::sync::Arc;

use crate::inference::config::OrchestrationLimits;
use crate::inference::errors::InferenceError;
use crate::inference::session::{ChatSession, ModelBackend};
use crate::inference::types::{ConversationTurn, ModelResponse, Part};

use super::attachments::build_prompt_parts;
use super::conversation::normalize_history;
use super::events::{RequestId, StreamEmitter, StreamingSession};
use super::retry::RetryPolicy;
use super::tool_registry::{self, TAKE_SCREENSHOT};
use super::tool_router::{ToolContext, ToolExecutor, ToolPayload, ToolResult};

// ─── Messages ───────────────────────────────────────────────────────────────

/// Buffering variant: both the model and the search credential are required.
pub const MISSING_KEYS_MESSAGE: &str = "API Keys not set. Please set them in Settings.";

/// Streaming variant: only the model credential is required.
pub const MISSING_KEY_MESSAGE: &str = "API Key not set. Please set it in Settings.";

pub const OVERLOADED_MESSAGE: &str = "The model is overloaded. Please try again shortly.";

pub const RATE_LIMITED_MESSAGE: &str = "Rate limited. Please slow down and try again.";

// ─── Types ──────────────────────────────────────────────────────────────────

/// One user turn as handed over by the caller.
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub prompt: String,
    /// Transcript so far, possibly malformed; repaired before use.
    pub history: Vec<ConversationTurn>,
    pub attachment: Option<PathBuf>,
}

impl TurnRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_history(mut self, history: Vec<ConversationTurn>) -> Self {
        self.history = history;
        self
    }

    pub fn with_attachment(mut self, path: impl Into<PathBuf>) -> Self {
        self.attachment = Some(path.into());
        self
    }
}

/// Read-only credential snapshot for one invocation.
#[derive(Clone, Default)]
pub struct Credentials {
    pub model_api_key: String,
    pub search_api_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("model_api_key", &redacted(&self.model_api_key))
            .field("search_api_key", &redacted(&self.search_api_key))
            .finish()
    }
}

fn redacted(key: &str) -> &'static str {
    if key.is_empty() {
        "<unset>"
    } else {
        "<set>"
    }
}

/// Which caller-facing variant is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variant {
    Buffered,
    Streaming,
}

/// How model text reaches the caller during one attempt.
enum Delivery<'a> {
    Buffered,
    Streaming(&'a mut StreamingSession),
}

// ─── Orchestrator ───────────────────────────────────────────────────────────

/// Drives one user turn against the model with tool calling.
pub struct Orchestrator {
    backend: Arc<dyn ModelBackend>,
    executor: ToolExecutor,
    retry: RetryPolicy,
    limits: OrchestrationLimits,
    system_instruction: String,
    credentials: Credentials,
    working_directory: PathBuf,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        executor: ToolExecutor,
        limits: OrchestrationLimits,
        system_instruction: String,
        credentials: Credentials,
        working_directory: PathBuf,
    ) -> Self {
        Self {
            backend,
            executor,
            retry: RetryPolicy::from_limits(&limits),
            limits,
            system_instruction,
            credentials,
            working_directory,
        }
    }

    /// Buffering variant: returns the final answer or a user-facing error text.
    pub async fn invoke(&self, request: &TurnRequest) -> String {
        if self.credentials.model_api_key.is_empty() || self.credentials.search_api_key.is_empty() {
            tracing::warn!("invoke refused: credentials missing");
            return MISSING_KEYS_MESSAGE.to_string();
        }

        let (parts, history) = self.prepare(request).await;
        let result = self
            .retry
            .run(
                |_| self.run_turn(parts.clone(), history.clone(), Delivery::Buffered),
                InferenceError::is_transient,
            )
            .await;

        match result {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "turn failed");
                user_facing_message(&e, Variant::Buffered)
            }
        }
    }

    /// Streaming variant: reports through `emitter`, tagging every event with
    /// `request_id`. Exactly one terminal event is emitted.
    pub async fn invoke_stream(
        &self,
        request_id: RequestId,
        request: &TurnRequest,
        emitter: &StreamEmitter,
    ) {
        if self.credentials.model_api_key.is_empty() {
            tracing::warn!(request_id = %request_id, "stream refused: model credential missing");
            StreamingSession::new(request_id, emitter.clone()).fail(MISSING_KEY_MESSAGE.to_string());
            return;
        }

        let (parts, history) = self.prepare(request).await;
        let result = self
            .retry
            .run(
                |attempt| {
                    let mut session = StreamingSession::new(request_id.clone(), emitter.clone());
                    let parts = parts.clone();
                    let history = history.clone();
                    async move {
                        tracing::debug!(request_id = %session.request_id(), attempt, "stream attempt");
                        let text = self
                            .run_turn(parts, history, Delivery::Streaming(&mut session))
                            .await?;
                        Ok((text, session))
                    }
                },
                InferenceError::is_transient,
            )
            .await;

        match result {
            Ok((text, session)) => {
                tracing::info!(
                    request_id = %session.request_id(),
                    tool_calls = session.tool_calls_handled(),
                    streamed_bytes = session.accumulated_text().len(),
                    "stream complete"
                );
                session.finish(text);
            }
            Err(e) => {
                tracing::error!(request_id = %request_id, error = %e, "stream failed");
                StreamingSession::new(request_id, emitter.clone())
                    .fail(user_facing_message(&e, Variant::Streaming));
            }
        }
    }

    // ─── Shared loop ────────────────────────────────────────────────────

    async fn prepare(&self, request: &TurnRequest) -> (Vec<Part>, Vec<ConversationTurn>) {
        let history = normalize_history(&request.history, self.limits.history_window);
        let parts = build_prompt_parts(&request.prompt, request.attachment.as_deref()).await;
        (parts, history)
    }

    fn tool_context(&self) -> ToolContext {
        ToolContext {
            working_directory: self.working_directory.clone(),
            search_credential: self.credentials.search_api_key.clone(),
        }
    }

    /// One attempt at the whole turn, from a fresh chat session.
    async fn run_turn(
        &self,
        parts: Vec<Part>,
        history: Vec<ConversationTurn>,
        mut delivery: Delivery<'_>,
    ) -> Result<String, InferenceError> {
        let mut chat = ChatSession::new(
            Arc::clone(&self.backend),
            Some(self.system_instruction.clone()),
            tool_registry::declarations(),
            history,
        );
        let context = self.tool_context();

        let mut response = send(&mut chat, parts, &mut delivery).await?;
        let mut rounds = 0u32;

        loop {
            let calls = response.tool_calls();
            let Some(call) = calls.first() else {
                break;
            };
            if rounds >= self.limits.max_tool_rounds {
                tracing::warn!(
                    rounds,
                    pending_tool = %call.name,
                    "tool round budget exhausted, returning current text"
                );
                break;
            }
            if calls.len() > 1 {
                tracing::warn!(
                    requested = calls.len(),
                    executed = %call.name,
                    dropped = calls.len() - 1,
                    "model requested several tool calls, only the first is executed"
                );
            }

            rounds += 1;
            tracing::info!(round = rounds, tool = %call.name, "executing tool call");
            let result = self.executor.execute(call, &context).await;
            if let Delivery::Streaming(session) = &mut delivery {
                session.record_tool_call();
            }

            let next_parts = match result {
                ToolResult::Ok {
                    payload: ToolPayload::Screenshot { png, caption },
                } if call.name == TAKE_SCREENSHOT => {
                    vec![Part::text(caption), Part::inline_media("image/png", &png)]
                }
                other => vec![Part::tool_result(&call.name, other.to_response_value())],
            };
            response = send(&mut chat, next_parts, &mut delivery).await?;
        }

        tracing::info!(rounds, history_turns = chat.history().len(), "turn complete");
        Ok(response.text())
    }
}

/// Send one message through the chat session in the attempt's delivery mode.
async fn send(
    chat: &mut ChatSession,
    parts: Vec<Part>,
    delivery: &mut Delivery<'_>,
) -> Result<ModelResponse, InferenceError> {
    match delivery {
        Delivery::Buffered => chat.send(parts).await,
        Delivery::Streaming(session) => chat.send_streaming(parts, |text| session.chunk(text)).await,
    }
}

/// Translate a final provider failure into text for the user.
fn user_facing_message(error: &InferenceError, variant: Variant) -> String {
    if error.is_overloaded() {
        OVERLOADED_MESSAGE.to_string()
    } else if error.is_rate_limited() {
        RATE_LIMITED_MESSAGE.to_string()
    } else {
        match variant {
            Variant::Buffered => format!("Error: {error}"),
            Variant::Streaming => error.to_string(),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::events::{StreamAccumulator, StreamEvent, StreamOutcome};
    use crate::agent_core::tool_registry::{EXECUTE_TERMINAL_COMMAND, WEB_SEARCH};
    use crate::agent_core::tool_router::tests::{executor_with, FakeCapturer, FakeSearch};
    use crate::inference::config::ToolLimits;
    use crate::inference::session::tests::{call_response, text_response, ScriptedBackend};
    use crate::inference::types::{FunctionCall, Role};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::Instant;

    fn credentials() -> Credentials {
        Credentials {
            model_api_key: "model-key".into(),
            search_api_key: "serp-key".into(),
        }
    }

    fn orchestrator_with(backend: Arc<ScriptedBackend>, credentials: Credentials) -> Orchestrator {
        Orchestrator::new(
            backend,
            executor_with(FakeSearch::default(), ToolLimits::default()),
            OrchestrationLimits::default(),
            "system".into(),
            credentials,
            std::env::temp_dir(),
        )
    }

    fn overloaded() -> InferenceError {
        InferenceError::HttpError {
            status: 503,
            body: "overloaded".into(),
        }
    }

    fn drain(rx: &mut UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Parts of the user-role message sent in request `index`.
    fn sent_parts(backend: &ScriptedBackend, index: usize) -> Vec<Part> {
        let requests = backend.requests.lock().unwrap();
        let last = requests[index].contents.last().cloned().unwrap();
        assert_eq!(last.role, Role::User);
        last.parts
    }

    #[tokio::test]
    async fn test_plain_answer() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push(text_response("Hello!"));
        let orch = orchestrator_with(backend.clone(), credentials());

        let answer = orch.invoke(&TurnRequest::new("hi")).await;
        assert_eq!(answer, "Hello!");
        assert_eq!(backend.call_count(), 1);

        let request = backend.last_request();
        assert_eq!(request.tools.len(), 3);
        assert_eq!(request.system_instruction.as_deref(), Some("system"));
    }

    #[tokio::test]
    async fn test_history_is_repaired_before_sending() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push(text_response("ok"));
        let orch = orchestrator_with(backend.clone(), credentials());

        let history = vec![
            ConversationTurn::model_text("welcome"),
            ConversationTurn::user_text("q1"),
            ConversationTurn::user_text("q1 again"),
            ConversationTurn::model_text("a1"),
        ];
        orch.invoke(&TurnRequest::new("q2").with_history(history)).await;

        let roles: Vec<Role> = backend.last_request().contents.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Model, Role::User]);
    }

    #[tokio::test]
    async fn test_tool_result_fed_back_as_function_response() {
        let backend = Arc::new(ScriptedBackend::new());
        backend
            .push(call_response(WEB_SEARCH, json!({"query": "weather"})))
            .push(text_response("Sunny."));
        let orch = orchestrator_with(backend.clone(), credentials());

        let answer = orch.invoke(&TurnRequest::new("weather?")).await;
        assert_eq!(answer, "Sunny.");
        assert_eq!(backend.call_count(), 2);

        let parts = sent_parts(&backend, 1);
        match &parts[..] {
            [Part::ToolResult { function_response }] => {
                assert_eq!(function_response.name, WEB_SEARCH);
                assert_eq!(function_response.response["results"].as_array().unwrap().len(), 3);
            }
            other => panic!("expected a single tool result part, got {other:?}"),
        }

        // The second request carries user, model(call), user(result).
        let contents = backend.last_request().contents;
        assert_eq!(contents.len(), 3);
        assert!(matches!(contents[1].parts[0], Part::ToolCall { .. }));
    }

    #[tokio::test]
    async fn test_round_budget_caps_executions_at_three() {
        let backend = Arc::new(ScriptedBackend::new());
        for i in 0..10 {
            backend.push(call_response(WEB_SEARCH, json!({"query": format!("q{i}")})));
        }
        let search = Arc::new(FakeSearch::default());
        let orch = Orchestrator::new(
            backend.clone(),
            ToolExecutor::new(
                Arc::new(FakeCapturer { result: Ok((1, 1)) }),
                search.clone(),
                ToolLimits::default(),
            ),
            OrchestrationLimits::default(),
            "system".into(),
            credentials(),
            std::env::temp_dir(),
        );

        orch.invoke(&TurnRequest::new("loop forever")).await;

        assert_eq!(search.queries.lock().unwrap().len(), 3);
        assert_eq!(backend.call_count(), 4);
    }

    #[tokio::test]
    async fn test_round_budget_returns_text_so_far() {
        let backend = Arc::new(ScriptedBackend::new());
        for _ in 0..4 {
            backend.push(ModelResponse {
                parts: vec![
                    Part::text("Still looking."),
                    Part::ToolCall {
                        function_call: FunctionCall {
                            name: WEB_SEARCH.into(),
                            args: json!({"query": "x"}),
                        },
                        thought_signature: None,
                    },
                ],
                ..ModelResponse::default()
            });
        }
        let orch = orchestrator_with(backend, credentials());
        assert_eq!(orch.invoke(&TurnRequest::new("go")).await, "Still looking.");
    }

    #[tokio::test]
    async fn test_only_first_of_parallel_calls_executed() {
        let backend = Arc::new(ScriptedBackend::new());
        let call = |q: &str| Part::ToolCall {
            function_call: FunctionCall {
                name: WEB_SEARCH.into(),
                args: json!({"query": q}),
            },
            thought_signature: None,
        };
        backend
            .push(ModelResponse {
                parts: vec![call("first"), call("second")],
                ..ModelResponse::default()
            })
            .push(text_response("done"));
        let search = Arc::new(FakeSearch::default());
        let orch = Orchestrator::new(
            backend,
            ToolExecutor::new(
                Arc::new(FakeCapturer { result: Ok((1, 1)) }),
                search.clone(),
                ToolLimits::default(),
            ),
            OrchestrationLimits::default(),
            "system".into(),
            credentials(),
            std::env::temp_dir(),
        );

        assert_eq!(orch.invoke(&TurnRequest::new("two searches")).await, "done");
        let queries = search.queries.lock().unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].0, "first");
    }

    #[tokio::test]
    async fn test_screenshot_sent_as_new_multimodal_turn() {
        let backend = Arc::new(ScriptedBackend::new());
        backend
            .push(call_response(TAKE_SCREENSHOT, json!({"reason": "Check the dialog."})))
            .push(text_response("I see a dialog."));
        let orch = orchestrator_with(backend.clone(), credentials());

        let answer = orch.invoke(&TurnRequest::new("what's on screen?")).await;
        assert_eq!(answer, "I see a dialog.");

        let parts = sent_parts(&backend, 1);
        assert_eq!(parts.len(), 2);
        assert_eq!(
            parts[0],
            Part::text("Here's the current screen content. Check the dialog.")
        );
        match &parts[1] {
            Part::InlineMedia { inline_data } => assert_eq!(inline_data.mime_type, "image/png"),
            other => panic!("expected inline image, got {other:?}"),
        }
        assert!(!parts.iter().any(|p| matches!(p, Part::ToolResult { .. })));
    }

    #[tokio::test]
    async fn test_screenshot_failure_fed_back_as_error_result() {
        let backend = Arc::new(ScriptedBackend::new());
        backend
            .push(call_response(TAKE_SCREENSHOT, json!({"reason": "x"})))
            .push(text_response("I couldn't see your screen."));
        let orch = Orchestrator::new(
            backend.clone(),
            ToolExecutor::new(
                Arc::new(FakeCapturer {
                    result: Err("no display".into()),
                }),
                Arc::new(FakeSearch::default()),
                ToolLimits::default(),
            ),
            OrchestrationLimits::default(),
            "system".into(),
            credentials(),
            std::env::temp_dir(),
        );

        orch.invoke(&TurnRequest::new("look")).await;
        match &sent_parts(&backend, 1)[..] {
            [Part::ToolResult { function_response }] => assert_eq!(
                function_response.response,
                json!({"error": "Screenshot failed: no display"})
            ),
            other => panic!("expected error tool result, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_timeout_is_model_visible() {
        let backend = Arc::new(ScriptedBackend::new());
        backend
            .push(call_response(EXECUTE_TERMINAL_COMMAND, json!({"command": "sleep 15"})))
            .push(text_response("That command took too long."));
        let orch = Orchestrator::new(
            backend.clone(),
            executor_with(
                FakeSearch::default(),
                ToolLimits {
                    command_timeout_ms: 200,
                    ..ToolLimits::default()
                },
            ),
            OrchestrationLimits::default(),
            "system".into(),
            credentials(),
            std::env::temp_dir(),
        );

        let answer = orch.invoke(&TurnRequest::new("run it")).await;
        assert_eq!(answer, "That command took too long.");
        match &sent_parts(&backend, 1)[..] {
            [Part::ToolResult { function_response }] => {
                assert_eq!(function_response.response, json!({"error": "Command timeout"}))
            }
            other => panic!("expected error tool result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_is_model_visible() {
        let backend = Arc::new(ScriptedBackend::new());
        backend
            .push(call_response("launch_rockets", json!({})))
            .push(text_response("I can't do that."));
        let orch = orchestrator_with(backend.clone(), credentials());

        assert_eq!(orch.invoke(&TurnRequest::new("launch")).await, "I can't do that.");
        match &sent_parts(&backend, 1)[..] {
            [Part::ToolResult { function_response }] => assert_eq!(
                function_response.response,
                json!({"error": "Unknown tool called: launch_rockets"})
            ),
            other => panic!("expected error tool result, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_overloads_then_success() {
        let backend = Arc::new(ScriptedBackend::new());
        backend
            .push_error(overloaded())
            .push_error(overloaded())
            .push(text_response("Finally."));
        let orch = orchestrator_with(backend.clone(), credentials());

        let start = Instant::now();
        let answer = orch.invoke(&TurnRequest::new("hi")).await;
        let elapsed = start.elapsed();

        assert_eq!(answer, "Finally.");
        assert_eq!(backend.call_count(), 3);
        assert!(elapsed >= Duration::from_millis(1500) && elapsed < Duration::from_millis(1600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_four_overloads_surface_message() {
        let backend = Arc::new(ScriptedBackend::new());
        for _ in 0..5 {
            backend.push_error(overloaded());
        }
        let orch = orchestrator_with(backend.clone(), credentials());

        let answer = orch.invoke(&TurnRequest::new("hi")).await;
        assert_eq!(answer, OVERLOADED_MESSAGE);
        assert_eq!(backend.call_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_message() {
        let backend = Arc::new(ScriptedBackend::new());
        for _ in 0..4 {
            backend.push_error(InferenceError::HttpError {
                status: 429,
                body: "slow down".into(),
            });
        }
        let orch = orchestrator_with(backend, credentials());
        assert_eq!(orch.invoke(&TurnRequest::new("hi")).await, RATE_LIMITED_MESSAGE);
    }

    #[tokio::test]
    async fn test_non_transient_error_not_retried() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_error(InferenceError::HttpError {
            status: 400,
            body: "bad".into(),
        });
        let orch = orchestrator_with(backend.clone(), credentials());

        let answer = orch.invoke(&TurnRequest::new("hi")).await;
        assert_eq!(answer, "Error: HTTP 400: bad");
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_restarts_from_fresh_session() {
        let backend = Arc::new(ScriptedBackend::new());
        backend
            .push(call_response(WEB_SEARCH, json!({"query": "q"})))
            .push_error(overloaded())
            .push(text_response("recovered"));
        let orch = orchestrator_with(backend.clone(), credentials());

        assert_eq!(orch.invoke(&TurnRequest::new("hi")).await, "recovered");
        // The retry resends only the user's prompt, not the failed attempt's turns.
        let contents = backend.last_request().contents;
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].first_text(), Some("hi"));
    }

    #[tokio::test]
    async fn test_credential_gate_buffered() {
        let backend = Arc::new(ScriptedBackend::new());
        let missing_search = Credentials {
            model_api_key: "k".into(),
            search_api_key: String::new(),
        };
        let orch = orchestrator_with(backend.clone(), missing_search);
        assert_eq!(orch.invoke(&TurnRequest::new("hi")).await, MISSING_KEYS_MESSAGE);

        let orch = orchestrator_with(backend.clone(), Credentials::default());
        assert_eq!(orch.invoke(&TurnRequest::new("hi")).await, MISSING_KEYS_MESSAGE);
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_credential_gate_streaming() {
        let backend = Arc::new(ScriptedBackend::new());
        let orch = orchestrator_with(backend.clone(), Credentials::default());
        let (emitter, mut rx) = StreamEmitter::channel();

        orch.invoke_stream("r1".into(), &TurnRequest::new("hi"), &emitter)
            .await;

        assert_eq!(
            drain(&mut rx),
            vec![StreamEvent::Error {
                request_id: "r1".into(),
                error: MISSING_KEY_MESSAGE.into()
            }]
        );
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_streaming_only_needs_model_key() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push(text_response("ok"));
        let orch = orchestrator_with(
            backend.clone(),
            Credentials {
                model_api_key: "k".into(),
                search_api_key: String::new(),
            },
        );
        let (emitter, mut rx) = StreamEmitter::channel();
        orch.invoke_stream("r".into(), &TurnRequest::new("hi"), &emitter)
            .await;

        let events = drain(&mut rx);
        assert!(matches!(events.last(), Some(StreamEvent::End { .. })));
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_streaming_chunks_then_end() {
        let backend = Arc::new(ScriptedBackend::new());
        backend
            .push_fragments(vec![
                text_response("Let me "),
                call_response(WEB_SEARCH, json!({"query": "q"})),
            ])
            .push_fragments(vec![text_response("It is "), text_response("sunny.")]);
        let orch = orchestrator_with(backend.clone(), credentials());
        let (emitter, mut rx) = StreamEmitter::channel();

        orch.invoke_stream("req-1".into(), &TurnRequest::new("weather?"), &emitter)
            .await;

        let events = drain(&mut rx);
        let chunks: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Chunk { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(chunks, vec!["Let me ", "It is ", "sunny."]);
        assert_eq!(
            events.last(),
            Some(&StreamEvent::End {
                request_id: "req-1".into(),
                final_text: "It is sunny.".into()
            })
        );
        assert!(events.iter().all(|e| e.request_id().as_str() == "req-1"));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn test_streaming_error_event() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_error(InferenceError::StreamError {
            reason: "connection reset".into(),
        });
        let orch = orchestrator_with(backend, credentials());
        let (emitter, mut rx) = StreamEmitter::channel();

        orch.invoke_stream("r".into(), &TurnRequest::new("hi"), &emitter)
            .await;

        assert_eq!(
            drain(&mut rx),
            vec![StreamEvent::Error {
                request_id: "r".into(),
                error: "stream error: connection reset".into()
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_streaming_overload_exhaustion() {
        let backend = Arc::new(ScriptedBackend::new());
        for _ in 0..4 {
            backend.push_error(overloaded());
        }
        let orch = orchestrator_with(backend.clone(), credentials());
        let (emitter, mut rx) = StreamEmitter::channel();

        orch.invoke_stream("r".into(), &TurnRequest::new("hi"), &emitter)
            .await;

        assert_eq!(backend.call_count(), 4);
        assert_eq!(
            drain(&mut rx),
            vec![StreamEvent::Error {
                request_id: "r".into(),
                error: OVERLOADED_MESSAGE.into()
            }]
        );
    }

    #[tokio::test]
    async fn test_concurrent_streams_stay_separate() {
        let backend_a = Arc::new(ScriptedBackend::new());
        backend_a.push_fragments(vec![text_response("alpha "), text_response("one")]);
        let backend_b = Arc::new(ScriptedBackend::new());
        backend_b.push_fragments(vec![text_response("beta "), text_response("two")]);
        let orch_a = orchestrator_with(backend_a, credentials());
        let orch_b = orchestrator_with(backend_b, credentials());

        let (emitter, mut rx) = StreamEmitter::channel();
        let req_a = TurnRequest::new("a");
        let req_b = TurnRequest::new("b");
        tokio::join!(
            orch_a.invoke_stream("a".into(), &req_a, &emitter),
            orch_b.invoke_stream("b".into(), &req_b, &emitter),
        );

        let mut acc_a = StreamAccumulator::new();
        acc_a.begin("a".into());
        let mut acc_b = StreamAccumulator::new();
        acc_b.begin("b".into());
        for event in drain(&mut rx) {
            acc_a.apply(&event);
            acc_b.apply(&event);
        }

        assert_eq!(acc_a.text(), "alpha one");
        assert_eq!(acc_b.text(), "beta two");
        assert_eq!(acc_a.outcome(), Some(&StreamOutcome::Completed("alpha one".into())));
        assert_eq!(acc_b.outcome(), Some(&StreamOutcome::Completed("beta two".into())));
    }

    #[tokio::test]
    async fn test_attachment_prepended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan");
        std::fs::write(&path, b"%PDF-1.4 fake").unwrap();

        let backend = Arc::new(ScriptedBackend::new());
        backend.push(text_response("A PDF."));
        let orch = orchestrator_with(backend.clone(), credentials());
        orch.invoke(&TurnRequest::new("what is this?").with_attachment(&path))
            .await;

        let parts = sent_parts(&backend, 0);
        assert!(matches!(&parts[0], Part::InlineMedia { inline_data } if inline_data.mime_type == "application/pdf"));
        assert_eq!(parts[1], Part::text("what is this?"));
    }
}
