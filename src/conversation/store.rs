use std::collections::BTreeMap;

use tokio::time::Instant;

use crate::conversation::dedup::Deduplicator;
use crate::models::{ClassifiedMessage, Conversation};

pub const DEFAULT_HISTORY_LIMIT: usize = 30;

/// Result of focusing a contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Focus {
    Unchanged,
    /// A fresh conversation became active; `previous` is the contact it replaced.
    Switched { previous: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended { evicted: usize },
    Duplicate,
    /// Message belongs to a contact that is not in focus.
    NotActive,
}

/// Owner of the single active conversation and of not-yet-synced messages.
#[derive(Debug)]
pub struct ConversationStore {
    active: Option<Conversation>,
    epoch: u64,
    history_limit: usize,
    dedup: Deduplicator,
    /// Messages appended since the last sync, keyed by contact, oldest first.
    pending_sync: BTreeMap<String, Vec<ClassifiedMessage>>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl ConversationStore {
    pub fn new(history_limit: usize) -> Self {
        Self {
            active: None,
            epoch: 0,
            history_limit: history_limit.max(1),
            dedup: Deduplicator,
            pending_sync: BTreeMap::new(),
        }
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn active(&self) -> Option<&Conversation> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut Conversation> {
        self.active.as_mut()
    }

    /// Active conversation if it still belongs to switch generation `epoch`.
    pub fn active_in_epoch(&mut self, epoch: u64) -> Option<&mut Conversation> {
        self.active.as_mut().filter(|c| c.epoch() == epoch)
    }

    pub fn active_contact(&self) -> Option<&str> {
        self.active.as_ref().map(|c| c.contact_name())
    }

    /// Return the conversation for `contact_name`, switching focus if needed.
    ///
    /// A switch always starts from an empty history with no pending triggers.
    /// Unsynced messages of the previous contact stay queued under its name.
    pub fn get_or_create(&mut self, contact_name: &str, now: Instant) -> (Focus, &mut Conversation) {
        let same = self
            .active
            .as_ref()
            .map(|c| c.contact_name() == contact_name)
            .unwrap_or(false);

        let focus = if same {
            Focus::Unchanged
        } else {
            self.epoch += 1;
            let previous = self.active.take().map(|c| c.contact_name().to_string());
            Focus::Switched { previous }
        };

        let epoch = self.epoch;
        let conversation = self
            .active
            .get_or_insert_with(|| Conversation::new(contact_name, epoch, now));
        (focus, conversation)
    }

    pub fn is_duplicate(&self, text: &str) -> bool {
        self.active
            .as_ref()
            .map(|c| self.dedup.is_duplicate(text, c))
            .unwrap_or(false)
    }

    /// Append to the active conversation, evicting oldest entries past the limit.
    pub fn append(&mut self, message: ClassifiedMessage) -> AppendOutcome {
        let Some(conversation) = self.active.as_mut() else {
            return AppendOutcome::NotActive;
        };
        if conversation.contact_name() != message.contact_name {
            return AppendOutcome::NotActive;
        }
        if self.dedup.is_duplicate(&message.text, conversation) {
            return AppendOutcome::Duplicate;
        }

        self.pending_sync
            .entry(message.contact_name.clone())
            .or_default()
            .push(message.clone());

        conversation.history.push_back(message);
        let mut evicted = 0;
        while conversation.history.len() > self.history_limit {
            conversation.history.pop_front();
            evicted += 1;
        }

        AppendOutcome::Appended { evicted }
    }

    /// Manual chat reset: empty the active conversation and invalidate its timers.
    pub fn reset(&mut self, now: Instant) {
        self.epoch += 1;
        let epoch = self.epoch;
        if let Some(conversation) = self.active.as_mut() {
            conversation.reset(epoch, now);
        }
    }

    /// Logout: drop the active conversation and everything queued for sync.
    pub fn reset_all(&mut self) {
        self.epoch += 1;
        self.active = None;
        self.pending_sync.clear();
    }

    pub fn dirty_contacts(&self) -> Vec<String> {
        self.pending_sync
            .iter()
            .filter(|(_, messages)| !messages.is_empty())
            .map(|(contact, _)| contact.clone())
            .collect()
    }

    pub fn is_dirty(&self, contact_name: &str) -> bool {
        self.pending_sync
            .get(contact_name)
            .map(|messages| !messages.is_empty())
            .unwrap_or(false)
    }

    pub fn pending_len(&self, contact_name: &str) -> usize {
        self.pending_sync.get(contact_name).map(Vec::len).unwrap_or(0)
    }

    /// Everything appended for `contact_name` since the last take.
    pub fn take_pending(&mut self, contact_name: &str) -> Vec<ClassifiedMessage> {
        self.pending_sync.remove(contact_name).unwrap_or_default()
    }

    /// Put a batch back in front of anything queued after it.
    pub fn requeue(&mut self, contact_name: &str, mut batch: Vec<ClassifiedMessage>) {
        if batch.is_empty() {
            return;
        }
        let queued = self.pending_sync.entry(contact_name.to_string()).or_default();
        batch.append(queued);
        *queued = batch;
    }
}
