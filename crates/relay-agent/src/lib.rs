pub mod completion;
pub mod filter;
pub mod openai;
pub mod pipeline;
pub mod prompt;
pub mod provider;
pub mod retry;
pub mod runtime;
pub mod store;
pub mod stream;
pub mod window;

pub use completion::{CompletionClient, CompletionError};
pub use filter::{ResponseFilter, Verdict};
pub use openai::OpenAiProvider;
pub use prompt::PromptBuilder;
pub use provider::{CompletionRequest, LlmProvider, Prompt, ProviderError};
pub use retry::{RetryOutcome, RetryPolicy};
pub use runtime::AgentRuntime;
pub use store::ContextStore;
pub use window::{ContextEntry, ContextWindow};
