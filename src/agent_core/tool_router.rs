//! Tool execution: runs one model-requested tool call.
//!
//! The executor is the error boundary for tools: whatever happens (timeouts,
//! spawn failures, provider errors, unknown names) comes back as a
//! `ToolResult`, never as a panic or a propagated error. Timed operations race
//! against `tokio::time::timeout`; the losing future is dropped, which kills
//! a still-running shell child (`kill_on_drop`) and aborts an in-flight
//! search request.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::inference::config::ToolLimits;
use crate::inference::types::ToolInvocation;
use crate::tools::screenshot::{encode_thumbnail_png, ScreenCapturer};
use crate::tools::shell::run_shell_command;
use crate::tools::web_search::{SearchProvider, SearchSummary};

use super::tool_registry::{EXECUTE_TERMINAL_COMMAND, TAKE_SCREENSHOT, WEB_SEARCH};

/// Text sent alongside a screenshot when the model gave no reason.
const DEFAULT_SCREENSHOT_REASON: &str = "User requested screen analysis.";

// ─── Types ──────────────────────────────────────────────────────────────────

/// Per-call environment for tool execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub working_directory: PathBuf,
    pub search_credential: String,
}

/// Successful tool output.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolPayload {
    /// Structured data fed back to the model as a tool result.
    Json(serde_json::Value),
    /// A screen thumbnail; sent to the model as a new multimodal turn.
    Screenshot { png: Vec<u8>, caption: String },
}

/// Outcome of one tool call. Errors are data here, not control flow.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    Ok { payload: ToolPayload },
    Err { message: String },
}

impl ToolResult {
    fn json(value: serde_json::Value) -> Self {
        ToolResult::Ok {
            payload: ToolPayload::Json(value),
        }
    }

    fn err(message: impl Into<String>) -> Self {
        ToolResult::Err {
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ToolResult::Ok { .. })
    }

    /// The error message, if this is an `Err`.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            ToolResult::Err { message } => Some(message),
            ToolResult::Ok { .. } => None,
        }
    }

    /// The body of the `functionResponse` part for this result.
    pub fn to_response_value(&self) -> serde_json::Value {
        match self {
            ToolResult::Ok {
                payload: ToolPayload::Json(value),
            } => value.clone(),
            ToolResult::Ok {
                payload: ToolPayload::Screenshot { .. },
            } => serde_json::json!({
                "success": true,
                "message": "Screenshot taken and analyzed successfully"
            }),
            ToolResult::Err { message } => serde_json::json!({ "error": message }),
        }
    }
}

// ─── ToolExecutor ───────────────────────────────────────────────────────────

/// Dispatches tool invocations to their backends.
#[derive(Clone)]
pub struct ToolExecutor {
    capturer: Arc<dyn ScreenCapturer>,
    search: Arc<dyn SearchProvider>,
    limits: ToolLimits,
}

impl ToolExecutor {
    pub fn new(
        capturer: Arc<dyn ScreenCapturer>,
        search: Arc<dyn SearchProvider>,
        limits: ToolLimits,
    ) -> Self {
        Self {
            capturer,
            search,
            limits,
        }
    }

    /// Execute one invocation. Never fails; see [`ToolResult`].
    pub async fn execute(&self, invocation: &ToolInvocation, context: &ToolContext) -> ToolResult {
        let start = Instant::now();

        let result = match invocation.name.as_str() {
            EXECUTE_TERMINAL_COMMAND => self.run_command(invocation, context).await,
            TAKE_SCREENSHOT => self.take_screenshot(invocation).await,
            WEB_SEARCH => self.web_search(invocation, context).await,
            other => ToolResult::err(format!("Unknown tool called: {other}")),
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match result.error_message() {
            None => tracing::info!(tool = %invocation.name, elapsed_ms, "tool call succeeded"),
            Some(error) => {
                tracing::warn!(tool = %invocation.name, elapsed_ms, error = %error, "tool call failed")
            }
        }
        result
    }

    async fn run_command(&self, invocation: &ToolInvocation, context: &ToolContext) -> ToolResult {
        let Some(command) = invocation.str_arg("command") else {
            return ToolResult::err("Missing required argument 'command'");
        };
        tracing::debug!(command = %command, cwd = %context.working_directory.display(), "running shell command");

        let run = run_shell_command(command, &context.working_directory);
        match tokio::time::timeout(self.limits.command_timeout(), run).await {
            Err(_) => ToolResult::err("Command timeout"),
            Ok(Err(e)) => ToolResult::err(format!("Tool execution failed: {e}")),
            Ok(Ok(output)) => match serde_json::to_value(&output) {
                Ok(value) => ToolResult::json(value),
                Err(e) => ToolResult::err(format!("Tool execution failed: {e}")),
            },
        }
    }

    async fn take_screenshot(&self, invocation: &ToolInvocation) -> ToolResult {
        let reason = invocation
            .str_arg("reason")
            .unwrap_or(DEFAULT_SCREENSHOT_REASON);
        let caption = format!("Here's the current screen content. {reason}");

        let raw = match self.capturer.capture().await {
            Ok(raw) => raw,
            Err(e) => return ToolResult::err(format!("Screenshot failed: {e:#}")),
        };

        let (width, height) = (self.limits.screenshot_width, self.limits.screenshot_height);
        let encoded =
            tokio::task::spawn_blocking(move || encode_thumbnail_png(&raw, width, height)).await;

        match encoded {
            Ok(Ok(png)) => ToolResult::Ok {
                payload: ToolPayload::Screenshot { png, caption },
            },
            Ok(Err(e)) => ToolResult::err(format!("Screenshot failed: {e:#}")),
            Err(e) => ToolResult::err(format!("Screenshot failed: {e}")),
        }
    }

    async fn web_search(&self, invocation: &ToolInvocation, context: &ToolContext) -> ToolResult {
        let Some(query) = invocation.str_arg("query") else {
            return ToolResult::err("Missing required argument 'query'");
        };

        let search = self.search.search(query, &context.search_credential);
        match tokio::time::timeout(self.limits.search_timeout(), search).await {
            Err(_) => ToolResult::err("Search timeout"),
            Ok(Err(e)) => ToolResult::err(format!("Search failed: {e:#}")),
            Ok(Ok(response)) => match serde_json::to_value(SearchSummary::from(response)) {
                Ok(value) => ToolResult::json(value),
                Err(e) => ToolResult::err(format!("Search failed: {e}")),
            },
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
