//! Short chat titles generated from the opening user message.

use crate::agent_core::truncate_utf8;
use crate::inference::session::ModelBackend;
use crate::inference::types::{ConversationTurn, ModelRequest, Role};

/// How much of the opening message is shown to the model.
pub const TITLE_SOURCE_MAX_BYTES: usize = 200;

/// Ask the model for a 3-4 word title for a conversation.
///
/// Needs at least one full exchange. Only the first text part of the first
/// user turn is used. Any failure yields `None`; titles are cosmetic.
pub async fn generate_title(
    backend: &dyn ModelBackend,
    history: &[ConversationTurn],
) -> Option<String> {
    if history.len() < 2 {
        tracing::debug!(turns = history.len(), "not enough context for a title");
        return None;
    }

    let opening = history
        .iter()
        .find(|turn| turn.role == Role::User)
        .and_then(|turn| turn.first_text())?;
    let opening = truncate_utf8(opening, TITLE_SOURCE_MAX_BYTES);

    let request = ModelRequest {
        system_instruction: None,
        tools: Vec::new(),
        contents: vec![ConversationTurn::user_text(format!(
            "Create a 3-4 word title for this query: \"{opening}\". No quotes."
        ))],
    };

    match backend.generate(&request).await {
        Ok(response) => {
            let title = clean_title(&response.text());
            tracing::info!(title = ?title, "generated chat title");
            title
        }
        Err(e) => {
            tracing::warn!(error = %e, "title generation failed");
            None
        }
    }
}

/// Trim whitespace and drop double quotes the model adds despite being asked not to.
pub fn clean_title(raw: &str) -> Option<String> {
    let title = raw.trim().replace('"', "");
    let title = title.trim();
    (!title.is_empty()).then(|| title.to_string())
}
