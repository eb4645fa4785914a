use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::classifier::config::ClassifierConfig;
use crate::models::{ConfidenceSignal, Observation};

/// `9:41`, `09:41`, `9:41 PM`, `9:41pm`, `21:05`
fn clock_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^\d{1,2}:\d{2}(\s?[ap]\.?m\.?)?$").expect("clock pattern is valid")
    })
}

/// Collect every weak direction signal present on an observation.
pub fn detect_signals(observation: &Observation, config: &ClassifierConfig) -> BTreeSet<ConfidenceSignal> {
    let mut signals = BTreeSet::new();

    if observation.has_checkmark_glyph {
        signals.insert(ConfidenceSignal::Checkmark);
    }
    if has_status_keyword(&observation.content_description, config) {
        signals.insert(ConfidenceSignal::StatusKeyword);
    }
    if is_right_aligned(observation, config) {
        signals.insert(ConfidenceSignal::RightAligned);
    }
    if observation.background_hint {
        signals.insert(ConfidenceSignal::BackgroundHint);
    }

    signals
}

pub fn has_status_keyword(content_description: &str, config: &ClassifierConfig) -> bool {
    if content_description.is_empty() {
        return false;
    }
    let lowered = content_description.to_lowercase();
    config
        .status_keywords
        .iter()
        .any(|keyword| lowered.contains(keyword.as_str()))
}

pub fn is_right_aligned(observation: &Observation, config: &ClassifierConfig) -> bool {
    if observation.screen_width <= 0 {
        return false;
    }
    observation.bounds_left as f64 > observation.screen_width as f64 * config.right_aligned_ratio
}

/// Timestamps, presence lines and delivery labels rendered as plain text nodes.
pub fn is_status_text(trimmed: &str, config: &ClassifierConfig) -> bool {
    if clock_pattern().is_match(trimmed) {
        return true;
    }

    let lowered = trimmed.to_lowercase();
    if config.status_phrases.iter().any(|phrase| lowered == *phrase) {
        return true;
    }
    if config
        .status_prefixes
        .iter()
        .any(|prefix| lowered.starts_with(prefix.as_str()))
    {
        return true;
    }

    // "Alice is typing…"
    lowered.ends_with(" typing…") || lowered.ends_with(" typing...")
}
