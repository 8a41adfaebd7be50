//! OpenAI-compatible streaming chat completion provider (`/v1/chat/completions`).
//!
//! Requests are sent with `stream: true` and the server-sent event body is
//! turned into a [`TokenStream`] of content deltas. All OpenAI wire types
//! are private to this module.

use futures_util::{StreamExt, future, stream};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use crate::config::ModelConfig;
use crate::llm::{ProviderError, TokenStream};

// ── Public provider ───────────────────────────────────────────────────────────

/// Adapter for any HTTP endpoint implementing `/v1/chat/completions`.
///
/// Covers OpenAI and OpenAI-compatible servers (Ollama, LM Studio, vLLM).
/// Cheap to clone because `reqwest::Client` is an `Arc` internally.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    client: Client,
    api_base_url: String,
    model: String,
    temperature: f32,
    top_p: Option<f32>,
    presence_penalty: Option<f32>,
    frequency_penalty: Option<f32>,
    api_key: Option<String>,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: &ModelConfig) -> Result<Self, ProviderError> {
        // Bound connecting and each read, not the whole streamed body.
        let timeout = std::time::Duration::from_secs(config.timeout_seconds);
        let client = Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base_url: config.api_base_url.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            top_p: config.top_p,
            presence_penalty: config.presence_penalty,
            frequency_penalty: config.frequency_penalty,
            api_key: config.api_key.clone(),
        })
    }

    /// Send `content` as the user message and `system` as the system prompt,
    /// returning the reply as it streams in.
    pub async fn stream(&self, content: &str, system: Option<&str>) -> Result<TokenStream, ProviderError> {
        // Some models (gpt-5 family) do not accept a temperature parameter.
        let temperature = if self.model.starts_with("gpt-5") {
            None
        } else {
            Some(self.temperature)
        };

        let mut messages = Vec::new();
        if let Some(sys) = system {
            messages.push(Message { role: "system", content: sys.to_string() });
        }
        messages.push(Message { role: "user", content: content.to_string() });

        let payload = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature,
            top_p: self.top_p,
            presence_penalty: self.presence_penalty,
            frequency_penalty: self.frequency_penalty,
            stream: true,
        };

        debug!(
            model = %payload.model,
            temperature = ?payload.temperature,
            content_len = content.len(),
            "sending streaming LLM request"
        );
        if tracing::enabled!(tracing::Level::TRACE) {
            let json = serde_json::to_string_pretty(&payload)
                .unwrap_or_else(|e| format!("<serialization failed: {e}>"));
            trace!(payload = %json, "full LLM request payload");
        }

        let mut req = self.client.post(&self.api_base_url).json(&payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| {
            error!(url = %self.api_base_url, error = %e, "LLM HTTP request failed (transport)");
            ProviderError::Request(e.to_string())
        })?;

        let response = check_status(response).await?;

        // `None` marks the end of the body so an unterminated last line is
        // still parsed.
        let tokens = response
            .bytes_stream()
            .map(Some)
            .chain(stream::once(future::ready(None)))
            .scan(SseBuffer::default(), |buffer, chunk| {
                let items = match chunk {
                    Some(Ok(bytes)) => {
                        buffer.push(&bytes);
                        buffer.drain_deltas()
                    }
                    Some(Err(e)) => vec![Err(ProviderError::Request(e.to_string()))],
                    None => buffer.finish(),
                };
                future::ready(Some(items))
            })
            .flat_map(stream::iter);

        Ok(Box::pin(tokens))
    }
}

// ── SSE parsing ───────────────────────────────────────────────────────────────

/// Byte buffer for server-sent events.
///
/// Bytes are buffered rather than decoded per network chunk so multi-byte
/// UTF-8 characters split across chunks survive intact.
#[derive(Debug, Default)]
struct SseBuffer {
    pending: Vec<u8>,
    done: bool,
}

impl SseBuffer {
    fn push(&mut self, bytes: &[u8]) {
        if !self.done {
            self.pending.extend_from_slice(bytes);
        }
    }

    /// Parse whatever is left once the body has ended.
    fn finish(&mut self) -> Vec<Result<String, ProviderError>> {
        if self.done || self.pending.is_empty() {
            return Vec::new();
        }
        self.pending.push(b'\n');
        self.drain_deltas()
    }

    /// Consume every complete line, returning the non-empty content deltas.
    fn drain_deltas(&mut self) -> Vec<Result<String, ProviderError>> {
        let mut out = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);

            let Some(data) = line.strip_prefix("data:") else {
                // event:, id:, comments and blank separators
                continue;
            };
            let data = data.trim_start();
            if data == "[DONE]" {
                self.done = true;
                self.pending.clear();
                break;
            }
            if data.is_empty() {
                continue;
            }
            match serde_json::from_str::<ChatCompletionChunk>(data) {
                Ok(chunk) => {
                    if let Some(err) = chunk.error {
                        out.push(Err(ProviderError::Request(err.message)));
                        continue;
                    }
                    let delta = chunk
                        .choices
                        .into_iter()
                        .filter_map(|c| c.delta.content)
                        .collect::<String>();
                    if !delta.is_empty() {
                        out.push(Ok(delta));
                    }
                }
                Err(e) => out.push(Err(ProviderError::Stream(format!("{e}: {data}")))),
            }
        }
        out
    }
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

// Error envelope used by OpenAI and compatible APIs.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

/// Consume the response and return it if successful, or a structured error.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());

    let message = if let Ok(env) = serde_json::from_str::<ErrorEnvelope>(&body) {
        let code = env
            .error
            .code
            .map(|v| match v {
                serde_json::Value::String(s) => format!(" [code={s}]"),
                other => format!(" [code={other}]"),
            })
            .unwrap_or_default();
        format!("HTTP {status}{code}: {}", env.error.message)
    } else {
        format!("HTTP {status}: {body}")
    };

    error!(%status, %message, "LLM request returned HTTP error");
    Err(ProviderError::Request(message))
}
