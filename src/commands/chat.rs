//! Caller-facing chat entry points.
//!
//! These are what the front-end invokes: `invoke_ai` (buffered answer) and
//! `invoke_ai_stream` (request id now, events later). Each call snapshots the
//! settings and builds a fresh model client, so credential changes apply to
//! the next turn without restarting anything.

use std::path::PathBuf;
use std::sync::Arc;

use crate::agent_core::prompt::build_system_prompt;
use crate::agent_core::{
    Orchestrator, RequestId, StreamEmitter, StreamingSession, ToolExecutor, TurnRequest,
};
use crate::inference::config::AssistantConfig;
use crate::inference::types::ConversationTurn;
use crate::inference::{GeminiClient, InferenceError};
use crate::tools::shell::default_working_directory;
use crate::tools::{ScreenCapturer, SearchProvider, SerpApiClient, SystemScreenCapturer};

use super::settings::AssistantSettings;
use super::title;

/// Long-lived handle to the tool backends and configuration.
pub struct ChatService {
    config: AssistantConfig,
    capturer: Arc<dyn ScreenCapturer>,
    search: Arc<dyn SearchProvider>,
    working_directory: PathBuf,
}

impl ChatService {
    /// Service backed by the real screen and SerpAPI.
    pub fn new(config: AssistantConfig) -> anyhow::Result<Self> {
        let search = SerpApiClient::new(config.tools.search_base_url.clone())?;
        Ok(Self::with_backends(
            config,
            Arc::new(SystemScreenCapturer),
            Arc::new(search),
        ))
    }

    pub fn with_backends(
        config: AssistantConfig,
        capturer: Arc<dyn ScreenCapturer>,
        search: Arc<dyn SearchProvider>,
    ) -> Self {
        Self {
            config,
            capturer,
            search,
            working_directory: default_working_directory(),
        }
    }

    pub fn config(&self) -> &AssistantConfig {
        &self.config
    }

    fn orchestrator(&self, settings: &AssistantSettings) -> Result<Orchestrator, InferenceError> {
        let credentials = settings.credentials();
        let client = GeminiClient::new(&self.config.provider, credentials.model_api_key.clone())?;
        let executor = ToolExecutor::new(
            Arc::clone(&self.capturer),
            Arc::clone(&self.search),
            self.config.tools.clone(),
        );
        Ok(Orchestrator::new(
            Arc::new(client),
            executor,
            self.config.orchestration.clone(),
            build_system_prompt(settings.user_description()),
            credentials,
            self.working_directory.clone(),
        ))
    }

    /// Answer one user turn; errors come back as user-facing text.
    pub async fn invoke_ai(&self, settings: &AssistantSettings, request: TurnRequest) -> String {
        tracing::info!(
            prompt_chars = request.prompt.chars().count(),
            history_turns = request.history.len(),
            attachment = request.attachment.is_some(),
            "invoke_ai"
        );
        match self.orchestrator(settings) {
            Ok(orchestrator) => orchestrator.invoke(&request).await,
            Err(e) => {
                tracing::error!(error = %e, "failed to build model client");
                format!("Error: {e}")
            }
        }
    }

    /// Start a streamed turn and return its request id immediately.
    ///
    /// Events tagged with the returned id arrive on `emitter`'s channel; the
    /// last one is always `end` or `error`.
    pub fn invoke_ai_stream(
        &self,
        settings: &AssistantSettings,
        request: TurnRequest,
        emitter: StreamEmitter,
    ) -> RequestId {
        let request_id = RequestId::generate();
        tracing::info!(
            request_id = %request_id,
            prompt_chars = request.prompt.chars().count(),
            history_turns = request.history.len(),
            "invoke_ai_stream"
        );

        let orchestrator = match self.orchestrator(settings) {
            Ok(o) => o,
            Err(e) => {
                tracing::error!(request_id = %request_id, error = %e, "failed to build model client");
                StreamingSession::new(request_id.clone(), emitter).fail(e.to_string());
                return request_id;
            }
        };

        let id = request_id.clone();
        tokio::spawn(async move {
            orchestrator.invoke_stream(id, &request, &emitter).await;
        });
        request_id
    }

    /// Title for a conversation, or `None` when unavailable.
    pub async fn generate_title(
        &self,
        settings: &AssistantSettings,
        history: &[ConversationTurn],
    ) -> Option<String> {
        let api_key = settings.api_key();
        if api_key.is_empty() {
            tracing::debug!("no model credential, skipping title");
            return None;
        }
        let client = match GeminiClient::new(&self.config.provider, api_key) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "failed to build model client for title");
                return None;
            }
        };
        title::generate_title(&client, history).await
    }
}
