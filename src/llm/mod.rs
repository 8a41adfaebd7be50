//! LLM provider abstraction.
//!
//! `LlmProvider` is an enum over concrete provider implementations.
//! Add a new variant + module in `providers/` for each additional backend.
//!
//! Every provider produces a [`TokenStream`] of text chunks. Callers that
//! want the whole reply use [`LlmProvider::complete`], which buffers it.

pub mod providers;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use thiserror::Error;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("missing API key for provider {0}")]
    MissingApiKey(String),
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("malformed stream event: {0}")]
    Stream(String),
}

/// Async stream of text chunks as the model produces them.
pub type TokenStream = BoxStream<'static, Result<String, ProviderError>>;

// ── Provider enum ─────────────────────────────────────────────────────────────

/// All available provider backends.
///
/// Enum dispatch avoids `dyn` trait objects and the `async-trait` dependency.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    Dummy(providers::dummy::DummyProvider),
    Scripted(providers::scripted::ScriptedProvider),
    OpenAiCompatible(providers::openai_compatible::OpenAiCompatibleProvider),
}

impl LlmProvider {
    /// Start a completion for `content` with an optional system prompt.
    pub async fn stream(&self, content: &str, system: Option<&str>) -> Result<TokenStream, ProviderError> {
        match self {
            LlmProvider::Dummy(p) => Ok(p.stream(content)),
            LlmProvider::Scripted(p) => Ok(p.stream()),
            LlmProvider::OpenAiCompatible(p) => p.stream(content, system).await,
        }
    }

    /// Run a completion and buffer the full reply.
    pub async fn complete(&self, content: &str, system: Option<&str>) -> Result<String, ProviderError> {
        let mut tokens = self.stream(content, system).await?;
        let mut reply = String::new();
        while let Some(chunk) = tokens.next().await {
            reply.push_str(&chunk?);
        }
        Ok(reply)
    }

    pub fn name(&self) -> &'static str {
        match self {
            LlmProvider::Dummy(_) => "dummy",
            LlmProvider::Scripted(_) => "scripted",
            LlmProvider::OpenAiCompatible(_) => "openai-compatible",
        }
    }
}
