use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::provider::{CompletionRequest, CompletionResponse, LlmProvider, Prompt, ProviderError};
use crate::stream::{parse_sse_line, EventStream, StreamEvent};

const CHAT_PATH: &str = "/v1/chat/completions";
const TEXT_PATH: &str = "/v1/completions";

/// OpenAI-compatible provider. Speaks both the chat and the legacy text
/// completions endpoints, picked by the shape of the request's prompt.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        let base_url = base_url
            .unwrap_or_else(|| "https://api.openai.com".to_string())
            .trim_end_matches('/')
            .to_string();
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
        }
    }

    fn url(&self, prompt: &Prompt) -> String {
        let path = match prompt {
            Prompt::Chat { .. } => CHAT_PATH,
            Prompt::Text(_) => TEXT_PATH,
        };
        format!("{}{}", self.base_url, path)
    }

    /// POST the request and map non-success statuses to provider errors.
    async fn post(
        &self,
        req: &CompletionRequest,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let body = build_request_body(req, stream);
        let url = self.url(&req.prompt);

        debug!(model = %req.model, stream, %url, "sending request to OpenAI");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000) // convert seconds to ms
                .unwrap_or(5000);
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "OpenAI API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        Ok(resp)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn send(&self, req: &CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let resp = self.post(req, false).await?;
        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(parse_response(api_resp, &req.model))
    }

    async fn stream(&self, req: &CompletionRequest) -> Result<EventStream, ProviderError> {
        let resp = self.post(req, true).await?;
        Ok(Box::pin(sse_events(resp, req.model.clone())))
    }
}

fn build_request_body(req: &CompletionRequest, stream: bool) -> serde_json::Value {
    let mut body = match &req.prompt {
        Prompt::Chat { system, messages } => {
            // OpenAI uses a flat messages array; system is prepended as a system message.
            let mut out = vec![serde_json::json!({
                "role": "system",
                "content": system,
            })];
            for m in messages {
                out.push(serde_json::json!({
                    "role": m.role,
                    "content": m.content,
                }));
            }
            serde_json::json!({
                "model": req.model,
                "messages": out,
                "max_tokens": req.max_tokens,
                "stream": stream,
            })
        }
        Prompt::Text(prompt) => serde_json::json!({
            "model": req.model,
            "prompt": prompt,
            "max_tokens": req.max_tokens,
            "stream": stream,
        }),
    };
    if let Some(t) = req.temperature {
        body["temperature"] = serde_json::json!(t);
    }
    body
}

fn parse_response(resp: ApiResponse, requested_model: &str) -> CompletionResponse {
    let choice = resp.choices.into_iter().next();
    let content = choice
        .as_ref()
        .and_then(|c| {
            c.message
                .as_ref()
                .and_then(|m| m.content.clone())
                .or_else(|| c.text.clone())
        })
        .unwrap_or_default();
    let stop_reason = choice.and_then(|c| c.finish_reason).unwrap_or_default();
    let model = if resp.model.is_empty() {
        requested_model.to_string()
    } else {
        resp.model
    };

    CompletionResponse {
        content,
        model,
        stop_reason,
    }
}

/// What a single SSE `data:` payload carried.
#[derive(Debug, PartialEq, Eq)]
enum DataLine {
    /// The `[DONE]` terminator.
    Done,
    /// Zero or more text deltas, plus the finish reason when the chunk had one.
    Deltas {
        texts: Vec<String>,
        finish_reason: Option<String>,
    },
}

fn parse_stream_data(data: &str) -> Result<DataLine, ProviderError> {
    // OpenAI signals end-of-stream with a literal `[DONE]` data value
    if data == "[DONE]" {
        return Ok(DataLine::Done);
    }

    let chunk: StreamChunk =
        serde_json::from_str(data).map_err(|e| ProviderError::Parse(e.to_string()))?;

    if let Some(err) = chunk.error {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .map(String::from)
            .unwrap_or_else(|| err.to_string());
        return Err(ProviderError::Unavailable(message));
    }

    let mut texts = Vec::new();
    let mut finish_reason = None;
    for choice in chunk.choices {
        if let Some(reason) = choice.finish_reason.filter(|r| !r.is_empty()) {
            finish_reason = Some(reason);
        }
        // chat chunks carry `delta.content`, text chunks carry `text`
        let text = choice.delta.and_then(|d| d.content).or(choice.text);
        if let Some(text) = text.filter(|t| !t.is_empty()) {
            texts.push(text);
        }
    }
    Ok(DataLine::Deltas {
        texts,
        finish_reason,
    })
}

/// Turn an SSE response body into ordered [`StreamEvent`]s.
///
/// `Done` is only emitted after `data: [DONE]`; a body that ends early simply
/// ends the stream, which callers treat as an incomplete response.
fn sse_events(
    resp: reqwest::Response,
    model: String,
) -> impl Stream<Item = Result<StreamEvent, ProviderError>> + Send {
    async_stream::stream! {
        let mut byte_stream = resp.bytes_stream();
        let mut line_buf: Vec<u8> = Vec::new();
        let mut stop_reason = String::new();
        let mut finished = false;

        'read: while let Some(chunk) = byte_stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    yield Err(ProviderError::Http(e));
                    break 'read;
                }
            };

            line_buf.extend_from_slice(&chunk);

            // only complete lines are decoded; a multi-byte char may straddle chunks
            while let Some(pos) = line_buf.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = line_buf.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw).trim().to_string();
                if line.is_empty() {
                    continue;
                }

                let Some(data) = parse_sse_line(&line) else {
                    continue;
                };

                match parse_stream_data(data) {
                    Ok(DataLine::Done) => {
                        finished = true;
                        break 'read;
                    }
                    Ok(DataLine::Deltas { texts, finish_reason }) => {
                        if let Some(reason) = finish_reason {
                            stop_reason = reason;
                        }
                        for text in texts {
                            debug!(len = text.len(), "openai stream text delta");
                            yield Ok(StreamEvent::TextDelta { text });
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        break 'read;
                    }
                }
            }
        }

        if finished {
            yield Ok(StreamEvent::Done { model, stop_reason });
        }
    }
}

// OpenAI API response types, deserialization only

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChatMessage>,
    text: Option<String>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

// OpenAI streaming chunk types

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: Option<StreamDelta>,
    text: Option<String>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}
