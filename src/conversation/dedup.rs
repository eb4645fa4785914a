use crate::models::Conversation;

/// Exact-text duplicate filter over a conversation's history window.
///
/// The window is bounded by the store's history limit, so a check is at most
/// one pass over that many entries. Similar-but-distinct texts are distinct.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deduplicator;

impl Deduplicator {
    pub fn is_duplicate(&self, text: &str, conversation: &Conversation) -> bool {
        conversation.history().any(|message| message.text == text)
    }
}
