//! Pure projections of a message sequence.
//!
//! Nothing in here touches storage, the clock or the network: the same input
//! always yields byte-identical output.

use super::message::Message;
use protocol::{HistoryEntry, HistoryRole};

/// `"{sequence_number}: [{user|bot}] {content}"`, one line per message, in
/// sequence order.
pub fn to_numbered_transcript(messages: &[Message]) -> Vec<String> {
    let mut ordered: Vec<&Message> = messages.iter().collect();
    ordered.sort_by_key(|m| m.sequence_number);
    ordered
        .into_iter()
        .map(|m| format!("{}: [{}] {}", m.sequence_number, m.role.label(), m.content))
        .collect()
}

pub fn numbered_transcript_text(messages: &[Message]) -> String {
    to_numbered_transcript(messages).join("\n")
}

/// Minimal `{type, content}` payload for the backend's `message_history`.
pub fn to_backend_history(messages: &[Message]) -> Vec<HistoryEntry> {
    let mut ordered: Vec<&Message> = messages.iter().collect();
    ordered.sort_by_key(|m| m.sequence_number);
    ordered
        .into_iter()
        .map(|m| HistoryEntry { role: m.role.history_role(), content: m.content.clone() })
        .collect()
}

/// `User: ...` / `Bot: ...` transcript, the shape the backend feeds its prompt.
pub fn to_conversation_text(entries: &[HistoryEntry]) -> String {
    entries
        .iter()
        .map(|e| match e.role {
            HistoryRole::User => format!("User: {}", e.content),
            HistoryRole::Bot => format!("Bot: {}", e.content),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
