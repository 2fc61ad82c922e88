//! One completion attempt against the configured provider.
//!
//! Streaming mode drains the provider's event stream and returns the
//! concatenated deltas; a stream that ends without [`StreamEvent::Done`] is an
//! incomplete response and counts as a failure. Blocking mode makes a single
//! request and returns its text. Both paths are bounded by the request timeout
//! and abort as soon as the shutdown token fires.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::provider::{CompletionRequest, LlmProvider, ProviderError};
use crate::stream::StreamEvent;

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("completion timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("response stream ended before completion")]
    Incomplete,

    #[error("cancelled")]
    Cancelled,
}

impl CompletionError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub struct CompletionClient {
    provider: Arc<dyn LlmProvider>,
    streaming: bool,
    timeout: Duration,
}

impl CompletionClient {
    pub fn new(provider: Arc<dyn LlmProvider>, streaming: bool, timeout: Duration) -> Self {
        Self {
            provider,
            streaming,
            timeout,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Run one attempt and return the full response text.
    pub async fn complete(
        &self,
        req: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<String, CompletionError> {
        let call = async {
            if self.streaming {
                self.collect_stream(req, cancel).await
            } else {
                self.provider
                    .send(req)
                    .await
                    .map(|resp| resp.content)
                    .map_err(CompletionError::from)
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CompletionError::Cancelled),
            result = tokio::time::timeout(self.timeout, call) => match result {
                Ok(inner) => inner,
                Err(_) => Err(CompletionError::Timeout {
                    ms: self.timeout.as_millis() as u64,
                }),
            },
        }
    }

    async fn collect_stream(
        &self,
        req: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<String, CompletionError> {
        let mut events = self.provider.stream(req).await?;
        let mut text = String::new();

        while let Some(event) = events.next().await {
            if cancel.is_cancelled() {
                return Err(CompletionError::Cancelled);
            }
            match event? {
                StreamEvent::TextDelta { text: delta } => text.push_str(&delta),
                StreamEvent::Done { model, stop_reason } => {
                    debug!(%model, %stop_reason, chars = text.len(), "stream complete");
                    return Ok(text);
                }
            }
        }

        Err(CompletionError::Incomplete)
    }
}
