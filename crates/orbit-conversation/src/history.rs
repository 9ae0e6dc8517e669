use orbit_types::api::{HistoryEntry, Role};
use orbit_types::models::Message;

/// Most turns handed to the generation backend as context.
pub const DEFAULT_HISTORY_WINDOW: usize = 10;

/// The generation window: the chat's most recent `limit` turns, oldest first.
///
/// Empty model messages are placeholders of generations that never finished
/// and carry no context, so they are left out.
pub fn generation_window(messages: &[Message], limit: usize) -> Vec<HistoryEntry> {
    let mut turns: Vec<&Message> = messages
        .iter()
        .filter(|m| !m.is_pending_placeholder())
        .collect();
    turns.sort_by_key(|m| m.created_at);

    let skip = turns.len().saturating_sub(limit);
    turns
        .into_iter()
        .skip(skip)
        .map(|m| HistoryEntry {
            role: if m.from_client { Role::User } else { Role::Assistant },
            content: m.content.clone(),
        })
        .collect()
}
