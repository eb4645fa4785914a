use chrono::{DateTime, Local, Utc};

use crate::classifier::config::ClassifierConfig;
use crate::classifier::signals::{detect_signals, is_status_text};
use crate::models::{ClassifiedMessage, ConfidenceSignal, Observation};

/// Why an observation produced no message. Rejections are silent drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Blank,
    TooShort,
    StatusText,
}

#[derive(Debug, Clone, Default)]
pub struct MessageClassifier {
    config: ClassifierConfig,
}

impl MessageClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Classify one observation for `contact_name`, stamped at `observed_at`.
    pub fn classify(
        &self,
        observation: &Observation,
        contact_name: &str,
        observed_at: DateTime<Utc>,
    ) -> Result<ClassifiedMessage, Rejection> {
        let text = observation.text.trim();
        if text.is_empty() {
            return Err(Rejection::Blank);
        }
        if text.chars().count() < self.config.min_text_chars {
            return Err(Rejection::TooShort);
        }
        if is_status_text(text, &self.config) {
            return Err(Rejection::StatusText);
        }

        let signals = detect_signals(observation, &self.config);
        let is_outgoing = is_outgoing(&signals);

        Ok(ClassifiedMessage {
            text: text.to_string(),
            is_incoming: !is_outgoing,
            confidence_signals: signals,
            timestamp_millis: observed_at.timestamp_millis(),
            display_timestamp: observed_at.with_timezone(&Local).format("%H:%M").to_string(),
            contact_name: contact_name.to_string(),
        })
    }
}

/// Any strong signal, or right alignment backed by a second weak signal.
fn is_outgoing(signals: &std::collections::BTreeSet<ConfidenceSignal>) -> bool {
    if signals.contains(&ConfidenceSignal::Checkmark) {
        return true;
    }
    if signals.contains(&ConfidenceSignal::StatusKeyword) {
        return true;
    }

    // Centered system messages can sit right of the threshold; position alone is not enough.
    signals.contains(&ConfidenceSignal::RightAligned)
        && signals.contains(&ConfidenceSignal::BackgroundHint)
}
