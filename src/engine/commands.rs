use serde::Deserialize;
use tokio::sync::oneshot;

use crate::models::{ConversationSnapshot, ObservationBatch};

pub const DEFAULT_HISTORY_FETCH_LIMIT: usize = 50;

/// Work items for the engine task. Everything that touches conversation
/// state arrives through this queue.
#[derive(Debug)]
pub enum EngineCommand {
    Observe(ObservationBatch),
    ImproveDraft(String),
    ResetChat,
    Logout,
    AcceptChat(String),
    ListAcceptedChats,
    FetchMessages { contact_name: String, limit: usize },
    FlushSync,
    Snapshot(oneshot::Sender<Option<ConversationSnapshot>>),
}

/// One line of host input.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum HostEvent {
    Observations(ObservationBatch),
    ImproveDraft { draft: String },
    ResetChat,
    Logout,
    AcceptChat { chat_name: String },
    AcceptedChats,
    ChatMessages { chat_name: String, limit: Option<usize> },
    FlushSync,
}

impl From<HostEvent> for EngineCommand {
    fn from(event: HostEvent) -> Self {
        match event {
            HostEvent::Observations(batch) => Self::Observe(batch),
            HostEvent::ImproveDraft { draft } => Self::ImproveDraft(draft),
            HostEvent::ResetChat => Self::ResetChat,
            HostEvent::Logout => Self::Logout,
            HostEvent::AcceptChat { chat_name } => Self::AcceptChat(chat_name),
            HostEvent::AcceptedChats => Self::ListAcceptedChats,
            HostEvent::ChatMessages { chat_name, limit } => Self::FetchMessages {
                contact_name: chat_name,
                limit: limit.unwrap_or(DEFAULT_HISTORY_FETCH_LIMIT),
            },
            HostEvent::FlushSync => Self::FlushSync,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observation_lines_parse_into_batches() {
        let line = r#"{"type":"observations","contactName":"Alice","observations":[
            {"text":"Hi","boundsLeft":10,"boundsRight":300,"boundsTop":100,"boundsBottom":140,"screenWidth":1080}
        ]}"#;
        let event: HostEvent = serde_json::from_str(line).unwrap();
        let EngineCommand::Observe(batch) = EngineCommand::from(event) else {
            panic!("expected observe command");
        };
        assert_eq!(batch.contact_name, "Alice");
        assert_eq!(batch.observations[0].text, "Hi");
        assert!(!batch.observations[0].has_checkmark_glyph);
    }

    #[test]
    fn chat_messages_defaults_its_limit() {
        let event: HostEvent = serde_json::from_str(r#"{"type":"chatMessages","chatName":"Bob"}"#).unwrap();
        assert!(matches!(
            EngineCommand::from(event),
            EngineCommand::FetchMessages { limit: DEFAULT_HISTORY_FETCH_LIMIT, .. }
        ));
    }

    #[test]
    fn unknown_event_types_are_rejected() {
        assert!(serde_json::from_str::<HostEvent>(r#"{"type":"launchRockets"}"#).is_err());
    }
}
