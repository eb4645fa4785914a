//! Errors crossing the engine's collaborator boundary (AI service, backend).
//!
//! Classification rejections and duplicate drops are not errors; they are
//! reported through `Rejection` and `AppendOutcome`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend rejected the bearer token, or none was configured.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Backend answered with a non-success status or `success: false`.
    #[error("Backend error ({status}): {message}")]
    Backend { status: u16, message: String },

    /// AI completion failed or returned an unusable body.
    #[error("Suggestion service error: {0}")]
    SuggestionService(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The engine task is gone; commands can no longer be delivered.
    #[error("Engine channel closed")]
    ChannelClosed,
}

impl EngineError {
    pub fn backend(status: u16, message: impl Into<String>) -> Self {
        Self::Backend {
            status,
            message: message.into(),
        }
    }

    pub fn suggestion(message: impl Into<String>) -> Self {
        Self::SuggestionService(message.into())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
