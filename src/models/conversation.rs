use std::collections::VecDeque;

use serde::Serialize;
use tokio::time::Instant;

use crate::trigger::{TriggerAxes, TriggerState};

use super::ClassifiedMessage;

/// Bounded, ordered message history plus trigger state for one contact.
///
/// Only the `ConversationStore` creates conversations and only the trigger
/// policy moves `triggers`.
#[derive(Debug, Clone)]
pub struct Conversation {
    contact_name: String,
    pub(crate) history: VecDeque<ClassifiedMessage>,
    pub(crate) triggers: TriggerAxes,
    /// Stamped when the conversation becomes active and on every reply dispatch.
    pub(crate) last_request_at: Instant,
    epoch: u64,
}

impl Conversation {
    pub(crate) fn new(contact_name: impl Into<String>, epoch: u64, now: Instant) -> Self {
        Self {
            contact_name: contact_name.into(),
            history: VecDeque::new(),
            triggers: TriggerAxes::default(),
            last_request_at: now,
            epoch,
        }
    }

    pub fn contact_name(&self) -> &str {
        &self.contact_name
    }

    /// Switch generation this conversation belongs to.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn history(&self) -> impl Iterator<Item = &ClassifiedMessage> {
        self.history.iter()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn last(&self) -> Option<&ClassifiedMessage> {
        self.history.back()
    }

    pub fn last_is_incoming(&self) -> bool {
        self.last().map(|m| m.is_incoming).unwrap_or(false)
    }

    pub fn trigger_state(&self) -> TriggerState {
        self.triggers.state()
    }

    pub fn last_request_at(&self) -> Instant {
        self.last_request_at
    }

    /// Clear history and triggers and move to a new switch generation.
    pub(crate) fn reset(&mut self, epoch: u64, now: Instant) {
        self.history.clear();
        self.triggers.clear();
        self.last_request_at = now;
        self.epoch = epoch;
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            contact_name: self.contact_name.clone(),
            history: self.history.iter().cloned().collect(),
            trigger_state: self.trigger_state(),
            epoch: self.epoch,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSnapshot {
    pub contact_name: String,
    pub history: Vec<ClassifiedMessage>,
    pub trigger_state: TriggerState,
    pub epoch: u64,
}

impl ConversationSnapshot {
    pub fn texts(&self) -> Vec<&str> {
        self.history.iter().map(|m| m.text.as_str()).collect()
    }
}
