use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::completion::{CompletionClient, CompletionError};
use crate::filter::ResponseFilter;
use crate::prompt::PromptBuilder;
use crate::provider::CompletionRequest;
use crate::retry::{RetryOutcome, RetryPolicy};
use crate::window::{ContextEntry, ContextWindow};

/// Central agent runtime: completion client, prompt builder, retry policy and
/// response filter. Shared across all conversations via `Arc` in the host state.
pub struct AgentRuntime {
    client: CompletionClient,
    prompt: PromptBuilder,
    retry: RetryPolicy,
    filter: ResponseFilter,
    model: String,
    max_tokens: u32,
    temperature: Option<f32>,
}

impl AgentRuntime {
    pub fn new(client: CompletionClient, prompt: PromptBuilder, model: impl Into<String>) -> Self {
        Self {
            client,
            prompt,
            retry: RetryPolicy::default(),
            filter: ResponseFilter::default(),
            model: model.into(),
            max_tokens: relay_core::config::DEFAULT_MAX_TOKENS,
            temperature: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_filter(mut self, filter: ResponseFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_sampling(mut self, max_tokens: u32, temperature: Option<f32>) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn filter(&self) -> &ResponseFilter {
        &self.filter
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Request for `message` against the window as it stands right now.
    pub fn build_request(&self, window: &ContextWindow, message: &ContextEntry) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            prompt: self.prompt.build(window.iter(), message),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }

    /// Ask the model about `message`, shrinking `window` on failure.
    pub async fn respond(
        &self,
        window: &mut ContextWindow,
        message: &ContextEntry,
        cancel: &CancellationToken,
    ) -> Result<RetryOutcome, CompletionError> {
        info!(
            model = %self.model, provider = %self.client.provider_name(),
            mode = ?self.prompt.mode(), context = window.len(), "processing completion request"
        );
        self.retry
            .run(
                &self.client,
                window,
                |w| self.build_request(w, message),
                cancel,
            )
            .await
    }
}
