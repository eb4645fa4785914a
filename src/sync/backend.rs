use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::{RequestBuilder, StatusCode, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, EngineResult};
use crate::models::MessagePayload;
use crate::settings::BackendSettings;
use crate::utils::logging::preview;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedChat {
    pub chat_name: String,
    #[serde(default)]
    pub accepted_at: Option<String>,
    #[serde(default)]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub message_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AcceptedResponse {
    #[serde(default)]
    accepted: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SavedResponse {
    #[serde(default)]
    saved_count: usize,
}

#[derive(Debug, Deserialize)]
struct DataResponse<T> {
    data: T,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AcceptChatBody<'a> {
    chat_name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SaveMessagesBody<'a> {
    chat_name: &'a str,
    messages: &'a [MessagePayload],
}

/// Remote store for accepted chats and their message history.
#[async_trait]
pub trait BackendClient: Send + Sync {
    async fn is_chat_accepted(&self, chat_name: &str) -> EngineResult<bool>;

    async fn accept_chat(&self, chat_name: &str) -> EngineResult<AcceptedChat>;

    /// Returns how many messages the backend stored.
    async fn save_messages(&self, chat_name: &str, messages: &[MessagePayload]) -> EngineResult<usize>;

    async fn fetch_messages(&self, chat_name: &str, limit: usize) -> EngineResult<Vec<MessagePayload>>;

    async fn list_accepted(&self) -> EngineResult<Vec<AcceptedChat>>;
}

pub struct HttpBackendClient {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpBackendClient {
    pub fn new(settings: &BackendSettings) -> EngineResult<Self> {
        let base_url = Url::parse(settings.base_url.trim())
            .map_err(|err| EngineError::Config(format!("invalid backend url: {err}")))?;
        if base_url.cannot_be_a_base() {
            return Err(EngineError::Config(format!(
                "backend url cannot be a base: {base_url}"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url,
            token: settings.token.clone().filter(|t| !t.is_empty()),
        })
    }

    fn url(&self, segments: &[&str]) -> EngineResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| EngineError::Config("backend url cannot be a base".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn call<T: DeserializeOwned>(&self, builder: RequestBuilder) -> EngineResult<T> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| EngineError::Unauthorized("no backend token configured".into()))?;

        let resp = builder.bearer_auth(token).send().await?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        debug!("[backend] response [{}]: {}", status, preview(&text, 300));

        if status == StatusCode::UNAUTHORIZED {
            return Err(EngineError::Unauthorized(preview(&text, 200)));
        }
        if !status.is_success() {
            return Err(EngineError::backend(status.as_u16(), preview(&text, 200)));
        }

        let body: Value = serde_json::from_str(&text)?;
        check_success(status.as_u16(), &body)?;
        Ok(serde_json::from_value(body)?)
    }
}

/// Reject `{"success": false, ...}` envelopes that arrive with a 2xx status.
fn check_success(status: u16, body: &Value) -> EngineResult<()> {
    if body.get("success").and_then(Value::as_bool) == Some(false) {
        let message = body
            .get("message")
            .or_else(|| body.get("error"))
            .and_then(Value::as_str)
            .unwrap_or("request was not successful");
        return Err(EngineError::backend(status, message));
    }
    Ok(())
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    async fn is_chat_accepted(&self, chat_name: &str) -> EngineResult<bool> {
        let url = self.url(&["chats", "accept", chat_name])?;
        let resp: AcceptedResponse = self.call(self.client.get(url)).await?;
        Ok(resp.accepted)
    }

    async fn accept_chat(&self, chat_name: &str) -> EngineResult<AcceptedChat> {
        let url = self.url(&["chats", "accept"])?;
        let body = AcceptChatBody { chat_name };
        let resp: DataResponse<AcceptedChat> = self.call(self.client.post(url).json(&body)).await?;
        Ok(resp.data)
    }

    async fn save_messages(&self, chat_name: &str, messages: &[MessagePayload]) -> EngineResult<usize> {
        let url = self.url(&["chats", "messages"])?;
        let body = SaveMessagesBody { chat_name, messages };
        let resp: SavedResponse = self.call(self.client.post(url).json(&body)).await?;
        Ok(resp.saved_count)
    }

    async fn fetch_messages(&self, chat_name: &str, limit: usize) -> EngineResult<Vec<MessagePayload>> {
        let url = self.url(&["chats", "messages", chat_name])?;
        let request = self.client.get(url).query(&[("limit", limit)]);
        let resp: DataResponse<Vec<MessagePayload>> = self.call(request).await?;
        Ok(resp.data)
    }

    async fn list_accepted(&self) -> EngineResult<Vec<AcceptedChat>> {
        let url = self.url(&["chats", "accepted"])?;
        let resp: DataResponse<Vec<AcceptedChat>> = self.call(self.client.get(url)).await?;
        Ok(resp.data)
    }
}
