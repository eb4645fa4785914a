/// Thresholds and vocabularies for message direction classification.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Texts shorter than this (in chars, after trim) are noise
    pub min_text_chars: usize,

    /// A bubble whose left edge is past this fraction of the screen is right-aligned
    pub right_aligned_ratio: f64,

    /// Content-description words that only appear on sent messages
    pub status_keywords: Vec<String>,

    /// Whole texts that are chat chrome, not messages (compared lowercased).
    /// Words people also send as replies ("seen", "today") stay out of this list.
    pub status_phrases: Vec<String>,

    /// Lowercased prefixes of chrome texts ("last seen today at 10:02")
    pub status_prefixes: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_text_chars: 2,
            right_aligned_ratio: 0.6,
            status_keywords: ["sent", "delivered", "read", "seen"]
                .into_iter()
                .map(String::from)
                .collect(),
            status_phrases: [
                "typing…",
                "typing...",
                "typing",
                "online",
                "offline",
                "delivered",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            status_prefixes: ["last seen", "recording audio"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl ClassifierConfig {
    pub fn with_right_aligned_ratio(mut self, ratio: f64) -> Self {
        self.right_aligned_ratio = ratio;
        self
    }
}
