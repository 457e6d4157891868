//! Commands exposed to the front-end.
//!
//! The desktop shell and the CLI both call into these; nothing below this
//! layer knows where a request came from.

pub mod chat;
pub mod settings;
pub mod title;

pub use chat::ChatService;
pub use settings::{AssistantSettings, SettingsError};
