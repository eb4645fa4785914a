use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TriggerState {
    None,
    SuggestionsRequested,
    ImprovementRequested,
}

impl Default for TriggerState {
    fn default() -> Self {
        TriggerState::None
    }
}

/// The two independent trigger axes of a conversation.
///
/// `state()` projects them onto a single `TriggerState`; the reply axis wins
/// when both are pending.
#[derive(Debug, Clone, Default)]
pub struct TriggerAxes {
    pub(crate) reply_requested: bool,
    pub(crate) improvement_requested: bool,
    /// Draft most recently sent for improvement; baseline for edit suppression.
    pub(crate) improved_draft: Option<String>,
}

impl TriggerAxes {
    pub fn state(&self) -> TriggerState {
        if self.reply_requested {
            TriggerState::SuggestionsRequested
        } else if self.improvement_requested {
            TriggerState::ImprovementRequested
        } else {
            TriggerState::None
        }
    }

    pub fn reply_requested(&self) -> bool {
        self.reply_requested
    }

    pub fn improvement_requested(&self) -> bool {
        self.improvement_requested
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }
}
