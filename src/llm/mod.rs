//! LLM integration for News Digest.
//!
//! The pipeline talks to models only through the `LlmProvider` trait. The
//! production stack is `RedactingProvider(RetryingProvider(OllamaProvider))`:
//! outbound messages are scrubbed first, then every call is time-bounded and
//! retried on transient failures.

pub mod ollama;
pub mod provider;
pub mod retry;

pub use ollama::OllamaProvider;
pub use provider::*;
pub use retry::{RetryPolicy, RetryingProvider};

use std::sync::Arc;
use std::time::Duration;

use crate::error::LlmError;
use crate::safety::{RedactingProvider, RedactionFilter};

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub retry: RetryPolicy,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.2".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl LlmConfig {
    /// Build from `OLLAMA_BASE_URL`, `OLLAMA_MODEL` and `OLLAMA_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("OLLAMA_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(model) = std::env::var("OLLAMA_MODEL") {
            config.model = model;
        }
        if let Some(secs) = std::env::var("OLLAMA_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            config.retry.call_timeout = Duration::from_secs(secs);
        }
        config
    }
}

/// Create the redacting, retrying provider stack from configuration.
pub fn create_provider(
    config: &LlmConfig,
    redaction: RedactionFilter,
) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let ollama: Arc<dyn LlmProvider> = Arc::new(OllamaProvider::new(
        &config.base_url,
        &config.model,
        config.retry.call_timeout,
    )?);
    let retrying: Arc<dyn LlmProvider> =
        Arc::new(RetryingProvider::new(ollama, config.retry.clone()));
    tracing::info!(
        "Using Ollama (model: {}, url: {})",
        config.model,
        config.base_url
    );
    Ok(Arc::new(RedactingProvider::new(retrying, redaction)))
}
