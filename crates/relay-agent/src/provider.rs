use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::stream::{EventStream, StreamEvent};

/// A single message in a chat-style request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
}

/// Payload of a completion request, in one of the two supported shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    /// System text followed by a message list (chat completions API).
    Chat {
        system: String,
        messages: Vec<Message>,
    },
    /// One flat prompt string (legacy text completions API).
    Text(String),
}

/// Request to an LLM provider. Built fresh for every attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: Prompt,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

/// Response from an LLM provider (non-streaming).
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    pub stop_reason: String,
}

/// Common interface for completion backends.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Send a non-streaming request and wait for the full response.
    async fn send(&self, req: &CompletionRequest) -> Result<CompletionResponse, ProviderError>;

    /// Open a streaming response.
    ///
    /// The stream yields text deltas in arrival order and ends with
    /// [`StreamEvent::Done`]. Default: falls back to `send` and emits the whole
    /// response as one delta.
    async fn stream(&self, req: &CompletionRequest) -> Result<EventStream, ProviderError> {
        let resp = self.send(req).await?;
        let events = vec![
            Ok(StreamEvent::TextDelta { text: resp.content }),
            Ok(StreamEvent::Done {
                model: resp.model,
                stop_reason: resp.stop_reason,
            }),
        ];
        Ok(Box::pin(futures_util::stream::iter(events)))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}
