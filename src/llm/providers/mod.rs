//! LLM provider implementations.
//!
//! `build(config)` is the factory, called once per role at startup.
//! Adding a new backend = new module + new match arm.

pub mod dummy;
pub mod openai_compatible;
pub mod scripted;

use crate::config::ModelConfig;
use crate::llm::{LlmProvider, ProviderError};

/// Construct an `LlmProvider` from a resolved role config.
///
/// `scripted` cannot be built from config; construct
/// [`scripted::ScriptedProvider`] directly.
pub fn build(config: &ModelConfig) -> Result<LlmProvider, ProviderError> {
    match config.provider.as_str() {
        "dummy" => Ok(LlmProvider::Dummy(dummy::DummyProvider)),
        "openai" | "openai-compatible" => {
            if !config.has_credentials() {
                return Err(ProviderError::MissingApiKey(config.provider.clone()));
            }
            let p = openai_compatible::OpenAiCompatibleProvider::new(config)?;
            Ok(LlmProvider::OpenAiCompatible(p))
        }
        _ => Err(ProviderError::UnknownProvider(config.provider.clone())),
    }
}
