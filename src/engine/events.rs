use std::io::Write;

use log::error;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::models::MessagePayload;
use crate::sync::{AcceptedChat, FlushReport};

/// Notifications for the host UI, serialized as `{"event": ..., "payload": ...}`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(
    tag = "event",
    content = "payload",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum EngineEvent {
    ConversationSwitched {
        contact_name: String,
        previous: Option<String>,
    },
    MessageAppended {
        contact_name: String,
        message: MessagePayload,
        history_len: usize,
    },
    SuggestionsReady {
        contact_name: String,
        replies: Vec<String>,
        /// Stock phrase shown because the service failed.
        fallback: bool,
    },
    SuggestionsCleared {
        contact_name: String,
    },
    ImprovementReady {
        contact_name: String,
        draft: String,
        suggestions: Vec<String>,
    },
    ImprovementFailed {
        contact_name: String,
        draft: String,
        error: String,
    },
    ConversationReset {
        contact_name: Option<String>,
    },
    LoggedOut,
    SyncCompleted {
        contact_name: String,
        saved: usize,
    },
    SyncSkipped {
        contact_name: String,
        dropped: usize,
    },
    SyncFailed {
        contact_name: String,
        error: String,
        pending: usize,
    },
    ChatAccepted {
        chat: AcceptedChat,
    },
    AcceptedChats {
        chats: Vec<AcceptedChat>,
    },
    ChatMessages {
        contact_name: String,
        messages: Vec<MessagePayload>,
    },
    OperationFailed {
        operation: String,
        error: String,
    },
}

impl From<FlushReport> for EngineEvent {
    fn from(report: FlushReport) -> Self {
        match report {
            FlushReport::Synced { contact_name, saved } => Self::SyncCompleted { contact_name, saved },
            FlushReport::Skipped {
                contact_name,
                dropped,
            } => Self::SyncSkipped {
                contact_name,
                dropped,
            },
            FlushReport::Failed {
                contact_name,
                error,
                pending,
            } => Self::SyncFailed {
                contact_name,
                error,
                pending,
            },
        }
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// Writes one JSON line per event to stdout.
pub struct StdoutSink;

impl EventSink for StdoutSink {
    fn emit(&self, event: EngineEvent) {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(err) => {
                error!("Failed to serialize engine event: {err}");
                return;
            }
        };
        let mut stdout = std::io::stdout().lock();
        if let Err(err) = writeln!(stdout, "{line}").and_then(|_| stdout.flush()) {
            error!("Failed to write engine event: {err}");
        }
    }
}

/// Forwards events into a channel, for embedding hosts and tests.
pub struct ChannelSink(mpsc::UnboundedSender<EngineEvent>);

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: EngineEvent) {
        let _ = self.0.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_serialize_with_kebab_names_and_camel_fields() {
        let event = EngineEvent::SuggestionsReady {
            contact_name: "Alice".into(),
            replies: vec!["Sure".into()],
            fallback: false,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "event": "suggestions-ready",
                "payload": {"contactName": "Alice", "replies": ["Sure"], "fallback": false}
            })
        );
    }

    #[test]
    fn unit_events_have_no_payload() {
        assert_eq!(
            serde_json::to_value(&EngineEvent::LoggedOut).unwrap(),
            json!({"event": "logged-out"})
        );
    }

    #[test]
    fn failed_flush_maps_to_sync_failed() {
        let event = EngineEvent::from(FlushReport::Failed {
            contact_name: "Bob".into(),
            error: "offline".into(),
            pending: 3,
        });
        assert!(matches!(event, EngineEvent::SyncFailed { pending: 3, .. }));
    }
}
