use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ConfidenceSignal {
    Checkmark,
    RightAligned,
    BackgroundHint,
    StatusKeyword,
}

/// A chat message after direction classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedMessage {
    pub text: String,
    pub is_incoming: bool,
    pub confidence_signals: BTreeSet<ConfidenceSignal>,
    pub timestamp_millis: i64,
    pub display_timestamp: String,
    pub contact_name: String,
}

impl ClassifiedMessage {
    pub fn is_outgoing(&self) -> bool {
        !self.is_incoming
    }

    pub fn has_signal(&self, signal: ConfidenceSignal) -> bool {
        self.confidence_signals.contains(&signal)
    }
}

/// Wire shape of a message in `POST /chats/messages`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub text: String,
    pub timestamp: String,
    pub timestamp_millis: i64,
    pub is_incoming: bool,
}

impl From<&ClassifiedMessage> for MessagePayload {
    fn from(message: &ClassifiedMessage) -> Self {
        Self {
            text: message.text.clone(),
            timestamp: message.display_timestamp.clone(),
            timestamp_millis: message.timestamp_millis,
            is_incoming: message.is_incoming,
        }
    }
}
