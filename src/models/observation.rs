use serde::{Deserialize, Serialize};

/// A single raw text sighting from the chat UI.
///
/// Produced per UI scan by the host's tree walker; never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub text: String,
    pub bounds_left: i32,
    pub bounds_right: i32,
    pub bounds_top: i32,
    pub bounds_bottom: i32,
    #[serde(default)]
    pub has_checkmark_glyph: bool,
    #[serde(default)]
    pub content_description: String,
    pub screen_width: i32,
    /// Host's reading of the bubble background (outgoing tint).
    #[serde(default)]
    pub background_hint: bool,
}

/// Every observation seen in one UI-content-changed event for the chat
/// whose header shows `contact_name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationBatch {
    pub contact_name: String,
    pub observations: Vec<Observation>,
}

impl ObservationBatch {
    /// Observations in screen order, top to bottom.
    pub fn in_screen_order(mut self) -> Vec<Observation> {
        self.observations.sort_by_key(|o| (o.bounds_top, o.bounds_left));
        self.observations
    }
}
