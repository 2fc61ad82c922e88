use std::pin::Pin;

use futures_util::Stream;

use crate::provider::ProviderError;

/// Events emitted during a streaming completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Incremental text content from the model.
    TextDelta { text: String },

    /// Stream completed successfully. Nothing follows this event.
    Done { model: String, stop_reason: String },
}

/// Ordered event stream returned by [`LlmProvider::stream`](crate::provider::LlmProvider::stream).
///
/// A transport failure is yielded as `Err` and ends the stream.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ProviderError>> + Send>>;

/// Payload of an SSE `data:` line. Event names, comments and other fields
/// yield `None`.
pub fn parse_sse_line(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}
