use crate::models::Conversation;

const INCOMING_PREFIX: &str = "Them";
const OUTGOING_PREFIX: &str = "Me";

/// Plain transcript of the last `max_messages` entries, oldest first.
///
/// Built when a request is dispatched, not when it is triggered, so coalesced
/// triggers see the freshest history.
pub fn conversation_context(conversation: &Conversation, max_messages: usize) -> String {
    let skip = conversation.len().saturating_sub(max_messages);
    conversation
        .history()
        .skip(skip)
        .map(|message| {
            let speaker = if message.is_incoming {
                INCOMING_PREFIX
            } else {
                OUTGOING_PREFIX
            };
            format!("{speaker}: {}", message.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
