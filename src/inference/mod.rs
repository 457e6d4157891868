//! Model client for the hosted LLM.
//!
//! This module handles all communication with the model provider:
//! - Buffered and streaming `generateContent` calls
//! - SSE stream parsing and fragment assembly
//! - Chat sessions that carry history between sends
//! - Configuration loading from `nexus.yaml`
//!
//! The orchestrator only sees the `ModelBackend` trait, so tests and
//! alternative providers plug in without touching the agent loop.

pub mod client;
pub mod config;
pub mod errors;
pub mod session;
pub mod streaming;
pub mod types;

// Re-exports for convenience
pub use client::GeminiClient;
pub use config::AssistantConfig;
pub use errors::InferenceError;
pub use session::{ChatSession, ModelBackend, ModelStream};
pub use types::{
    ConversationTurn, ModelResponse, Part, Role, ToolDeclaration, ToolInvocation,
};
