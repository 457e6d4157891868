//! History repair before every orchestration call.
//!
//! The provider rejects conversations that do not start with a user turn or
//! that repeat a role. Callers hand us whatever transcript they kept, so it
//! is windowed and repaired here, never rejected.

use crate::inference::types::{ConversationTurn, Role};

/// Default number of trailing turns carried into a new exchange.
pub const DEFAULT_HISTORY_WINDOW: usize = 6;

/// Window, then repair, a raw history.
///
/// 1. Keep only the last `window` turns.
/// 2. Drop leading `model` turns.
/// 3. Walk left to right with an expected role starting at `user`; keep a turn
///    only when its role matches (then flip the expectation), discard otherwise.
///
/// The result is empty or starts with `user` and strictly alternates.
pub fn normalize_history(history: &[ConversationTurn], window: usize) -> Vec<ConversationTurn> {
    let start = history.len().saturating_sub(window);
    let recent = history[start..]
        .iter()
        .skip_while(|turn| turn.role == Role::Model);

    let mut expected = Role::User;
    let mut normalized = Vec::with_capacity(window.min(history.len()));
    for turn in recent {
        if turn.role == expected {
            normalized.push(turn.clone());
            expected = expected.next();
        }
    }

    let dropped = history.len() - normalized.len();
    if dropped > 0 {
        tracing::debug!(
            input_turns = history.len(),
            kept = normalized.len(),
            dropped,
            "normalized history"
        );
    }
    normalized
}

// ─── Tests ──────────────────────────────────────────────────────────────────
