//! Orchestration layer for Nexus.
//!
//! Submodules:
//! - `orchestrator`: One user turn, buffered or streamed, with tool calling and retry
//! - `conversation`: History windowing and role-alternation repair
//! - `tool_registry`: The three tool declarations advertised to the model
//! - `tool_router`: Dispatches model tool calls to the tool backends
//! - `events`: Request-scoped stream events and the consumer-side accumulator
//! - `retry`: Exponential backoff for overload / rate-limit failures
//! - `attachments`: Content-sniffed inline media for prompts
//! - `prompt`: The system instruction
//! - `text`: UTF-8 safe truncation helpers

pub mod attachments;
pub mod conversation;
pub mod events;
pub mod orchestrator;
pub mod prompt;
pub mod retry;
mod text;
pub mod tool_registry;
pub mod tool_router;

// Re-exports for convenience
pub use conversation::normalize_history;
pub use events::{
    RequestId, StreamAccumulator, StreamEmitter, StreamEvent, StreamOutcome, StreamingSession,
};
pub use orchestrator::{Credentials, Orchestrator, TurnRequest};
pub use retry::RetryPolicy;
pub use tool_router::{ToolContext, ToolExecutor, ToolResult};

pub(crate) use text::{cap_output, truncate_utf8};
