use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock, time::Duration};

use crate::classifier::ClassifierConfig;
use crate::suggestions::default_fallback_replies;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendSettings {
    pub base_url: String,
    pub token: Option<String>,
    /// Only sync chats the backend reports as accepted.
    pub require_acceptance: bool,
    pub timeout_ms: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".into(),
            token: None,
            require_acceptance: true,
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SuggestionServiceSettings {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
}

impl Default for SuggestionServiceSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:3000/api/suggestions".into(),
            api_key: None,
            timeout_ms: 20_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    pub history_limit: usize,
    pub request_spacing_ms: u64,
    pub sync_interval_ms: u64,
    pub min_draft_chars: usize,
    pub min_draft_growth: usize,
    pub right_aligned_ratio: f64,
    /// Messages of history sent as request context.
    pub context_messages: usize,
    pub fallback_replies: Vec<String>,
    pub backend: BackendSettings,
    pub suggestions: SuggestionServiceSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            history_limit: 30,
            request_spacing_ms: 3000,
            sync_interval_ms: 5000,
            min_draft_chars: 5,
            min_draft_growth: 5,
            right_aligned_ratio: 0.6,
            context_messages: 12,
            fallback_replies: default_fallback_replies(),
            backend: BackendSettings::default(),
            suggestions: SuggestionServiceSettings::default(),
        }
    }
}

impl EngineSettings {
    pub fn request_spacing(&self) -> Duration {
        Duration::from_millis(self.request_spacing_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms.max(100))
    }

    pub fn classifier_config(&self) -> ClassifierConfig {
        ClassifierConfig::default().with_right_aligned_ratio(self.right_aligned_ratio)
    }

    /// Apply `REPLYCUE_*` overrides from `lookup` (normally the process env).
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(token) = lookup("REPLYCUE_BACKEND_TOKEN").filter(|t| !t.is_empty()) {
            self.backend.token = Some(token);
        }
        if let Some(key) = lookup("REPLYCUE_SUGGESTIONS_KEY").filter(|k| !k.is_empty()) {
            self.suggestions.api_key = Some(key);
        }
        let debug_mode = lookup("REPLYCUE_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if debug_mode {
            self.sync_interval_ms = 1000;
        }
        self
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<EngineSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Invalid settings in {}", path.display()))?
        } else {
            EngineSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn settings(&self) -> EngineSettings {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update(&self, settings: EngineSettings) -> Result<()> {
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = settings;
        self.persist(&guard)
    }

    fn persist(&self, data: &EngineSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
