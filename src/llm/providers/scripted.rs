//! Scripted provider: replays a fixed list of chunks for every request.
//!
//! Used to replay captured model output and to drive the extraction
//! pipeline deterministically in tests.

use std::sync::Arc;

use futures_util::stream;

use crate::llm::{ProviderError, TokenStream};

#[derive(Debug, Clone)]
pub struct ScriptedProvider {
    chunks: Arc<Vec<String>>,
    fail_with: Option<Arc<str>>,
}

impl ScriptedProvider {
    /// Reply with `reply` split into chunks of roughly `chunk_chars` characters.
    pub fn new(reply: &str, chunk_chars: usize) -> Self {
        let chars: Vec<char> = reply.chars().collect();
        let chunks = chars
            .chunks(chunk_chars.max(1))
            .map(|c| c.iter().collect::<String>())
            .collect();
        Self { chunks: Arc::new(chunks), fail_with: None }
    }

    pub fn from_chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            chunks: Arc::new(chunks.into_iter().map(Into::into).collect()),
            fail_with: None,
        }
    }

    /// Emit `chunks`, then fail the stream with `message`.
    pub fn failing_after<I, S>(chunks: I, message: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fail_with: Some(Arc::from(message)),
            ..Self::from_chunks(chunks)
        }
    }

    pub fn stream(&self) -> TokenStream {
        let mut items: Vec<Result<String, ProviderError>> =
            self.chunks.iter().cloned().map(Ok).collect();
        if let Some(msg) = &self.fail_with {
            items.push(Err(ProviderError::Request(msg.to_string())));
        }
        Box::pin(stream::iter(items))
    }
}
