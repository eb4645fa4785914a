use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::settings::SuggestionServiceSettings;
use crate::utils::logging::preview;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionRequest {
    pub conversation_context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft_text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SuggestionResponse {
    #[serde(default)]
    replies: Vec<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Black-box text completion endpoint producing reply or draft suggestions.
#[async_trait]
pub trait SuggestionService: Send + Sync {
    async fn complete(&self, request: SuggestionRequest) -> EngineResult<Vec<String>>;
}

pub struct HttpSuggestionService {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpSuggestionService {
    pub fn new(settings: &SuggestionServiceSettings) -> EngineResult<Self> {
        if settings.endpoint.trim().is_empty() {
            return Err(EngineError::Config("suggestion endpoint is empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            api_key: settings.api_key.clone().filter(|k| !k.is_empty()),
        })
    }
}

#[async_trait]
impl SuggestionService for HttpSuggestionService {
    async fn complete(&self, request: SuggestionRequest) -> EngineResult<Vec<String>> {
        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let resp = builder.send().await?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        debug!("[suggestions] response [{}]: {}", status, preview(&text, 300));

        if !status.is_success() {
            return Err(EngineError::suggestion(format!(
                "completion failed ({}): {}",
                status,
                preview(&text, 200)
            )));
        }

        parse_replies(&text)
    }
}

/// Non-empty, trimmed replies in service order.
pub fn parse_replies(body: &str) -> EngineResult<Vec<String>> {
    let response: SuggestionResponse = serde_json::from_str(body)
        .map_err(|e| EngineError::suggestion(format!("unparseable completion: {e}")))?;

    if let Some(message) = response.error {
        return Err(EngineError::suggestion(message));
    }

    let replies: Vec<String> = response
        .replies
        .into_iter()
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect();

    if replies.is_empty() {
        warn!("[suggestions] completion returned no usable replies");
        return Err(EngineError::suggestion("empty reply list"));
    }
    Ok(replies)
}
