//! Chat sessions over a `ModelBackend`.
//!
//! A `ChatSession` owns the history of one exchange and appends to it only
//! when a round trip succeeds, so a failed send leaves the session exactly as
//! it was.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

use super::errors::InferenceError;
use super::types::{ConversationTurn, ModelRequest, ModelResponse, Part, Role, ToolDeclaration};

/// Stream of response fragments from a streaming call.
pub type ModelStream = BoxStream<'static, Result<ModelResponse, InferenceError>>;

/// A model endpoint able to answer buffered and streamed requests.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// One complete response for the request.
    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse, InferenceError>;

    /// Incremental fragments for the request.
    async fn generate_stream(&self, request: &ModelRequest) -> Result<ModelStream, InferenceError>;
}

/// A multi-turn chat with fixed system instruction and tools.
pub struct ChatSession {
    backend: Arc<dyn ModelBackend>,
    system_instruction: Option<String>,
    tools: Vec<ToolDeclaration>,
    history: Vec<ConversationTurn>,
}

impl ChatSession {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        system_instruction: Option<String>,
        tools: Vec<ToolDeclaration>,
        history: Vec<ConversationTurn>,
    ) -> Self {
        Self {
            backend,
            system_instruction,
            tools,
            history,
        }
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    /// Send a user message and wait for the complete response.
    pub async fn send(&mut self, parts: Vec<Part>) -> Result<ModelResponse, InferenceError> {
        let user_turn = ConversationTurn::new(Role::User, parts);
        let request = self.request_with(&user_turn);

        tracing::debug!(
            turns = request.contents.len(),
            tools = request.tools.len(),
            streaming = false,
            "sending model request"
        );

        let response = self.backend.generate(&request).await?;
        self.record(user_turn, &response);
        Ok(response)
    }

    /// Send a user message and consume the response incrementally.
    ///
    /// `on_text` receives every non-empty text fragment in arrival order. The
    /// assembled response is returned once the stream ends.
    pub async fn send_streaming<F>(
        &mut self,
        parts: Vec<Part>,
        mut on_text: F,
    ) -> Result<ModelResponse, InferenceError>
    where
        F: FnMut(&str) + Send,
    {
        let user_turn = ConversationTurn::new(Role::User, parts);
        let request = self.request_with(&user_turn);

        tracing::debug!(
            turns = request.contents.len(),
            tools = request.tools.len(),
            streaming = true,
            "sending model request"
        );

        let mut fragments = self.backend.generate_stream(&request).await?;
        let mut assembled = ModelResponse::default();
        while let Some(fragment) = fragments.next().await {
            let fragment = fragment?;
            let text = fragment.text();
            if !text.is_empty() {
                on_text(&text);
            }
            assembled.merge(fragment);
        }

        self.record(user_turn, &assembled);
        Ok(assembled)
    }

    fn request_with(&self, user_turn: &ConversationTurn) -> ModelRequest {
        let mut contents = Vec::with_capacity(self.history.len() + 1);
        contents.extend(self.history.iter().cloned());
        contents.push(user_turn.clone());
        ModelRequest {
            system_instruction: self.system_instruction.clone(),
            tools: self.tools.clone(),
            contents,
        }
    }

    fn record(&mut self, user_turn: ConversationTurn, response: &ModelResponse) {
        self.history.push(user_turn);
        self.history.push(response.to_turn());
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Backend that replays scripted results and records every request.
    #[derive(Default)]
    pub(crate) struct ScriptedBackend {
        responses: Mutex<VecDeque<Result<Vec<ModelResponse>, InferenceError>>>,
        pub(crate) requests: Mutex<Vec<ModelRequest>>,
    }

    impl ScriptedBackend {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        /// Queue one buffered response (also usable as a single-fragment stream).
        pub(crate) fn push(&self, response: ModelResponse) -> &Self {
            self.push_fragments(vec![response])
        }

        /// Queue a response that streams as several fragments.
        pub(crate) fn push_fragments(&self, fragments: Vec<ModelResponse>) -> &Self {
            self.responses.lock().unwrap().push_back(Ok(fragments));
            self
        }

        pub(crate) fn push_error(&self, error: InferenceError) -> &Self {
            self.responses.lock().unwrap().push_back(Err(error));
            self
        }

        pub(crate) fn call_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        pub(crate) fn last_request(&self) -> ModelRequest {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }

        fn next(&self, request: &ModelRequest) -> Result<Vec<ModelResponse>, InferenceError> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(vec![text_response("")]))
        }
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse, InferenceError> {
            let fragments = self.next(request)?;
            let mut assembled = ModelResponse::default();
            for fragment in fragments {
                assembled.merge(fragment);
            }
            Ok(assembled)
        }

        async fn generate_stream(
            &self,
            request: &ModelRequest,
        ) -> Result<ModelStream, InferenceError> {
            let fragments = self.next(request)?;
            Ok(futures::stream::iter(fragments.into_iter().map(Ok)).boxed())
        }
    }

    pub(crate) fn text_response(text: &str) -> ModelResponse {
        ModelResponse {
            parts: vec![Part::text(text)],
            finish_reason: Some("STOP".into()),
            usage: None,
        }
    }

    pub(crate) fn call_response(name: &str, args: serde_json::Value) -> ModelResponse {
        ModelResponse {
            parts: vec![Part::ToolCall {
                function_call: super::super::types::FunctionCall {
                    name: name.into(),
                    args,
                },
                thought_signature: None,
            }],
            finish_reason: Some("STOP".into()),
            usage: None,
        }
    }

    fn session(backend: Arc<ScriptedBackend>, history: Vec<ConversationTurn>) -> ChatSession {
        ChatSession::new(backend, Some("system".into()), Vec::new(), history)
    }

    #[tokio::test]
    async fn test_send_appends_both_turns() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push(text_response("hi there"));
        let mut chat = session(backend.clone(), vec![]);

        let response = chat.send(vec![Part::text("hello")]).await.unwrap();

        assert_eq!(response.text(), "hi there");
        assert_eq!(chat.history().len(), 2);
        assert_eq!(chat.history()[0].role, Role::User);
        assert_eq!(chat.history()[1].role, Role::Model);
        assert_eq!(
            backend.last_request().system_instruction.as_deref(),
            Some("system")
        );
    }

    #[tokio::test]
    async fn test_request_carries_prior_history() {
        let backend = Arc::new(ScriptedBackend::new());
        let history = vec![
            ConversationTurn::user_text("earlier"),
            ConversationTurn::model_text("reply"),
        ];
        let mut chat = session(backend.clone(), history);
        chat.send(vec![Part::text("now")]).await.unwrap();

        let contents = backend.last_request().contents;
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[2].first_text(), Some("now"));
    }

    #[tokio::test]
    async fn test_failed_send_leaves_history_untouched() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_error(InferenceError::HttpError {
            status: 503,
            body: "overloaded".into(),
        });
        let mut chat = session(backend, vec![]);

        assert!(chat.send(vec![Part::text("hello")]).await.is_err());
        assert!(chat.history().is_empty());
    }

    #[tokio::test]
    async fn test_send_streaming_forwards_non_empty_fragments() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_fragments(vec![
            text_response("Hel"),
            text_response(""),
            text_response("lo"),
        ]);
        let mut chat = session(backend, vec![]);

        let mut seen = Vec::new();
        let response = chat
            .send_streaming(vec![Part::text("hi")], |t| seen.push(t.to_string()))
            .await
            .unwrap();

        assert_eq!(seen, vec!["Hel", "lo"]);
        assert_eq!(response.text(), "Hello");
        assert_eq!(chat.history()[1].first_text(), Some("Hello"));
    }
}
