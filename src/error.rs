//! Error types for News Digest.

use std::time::Duration;

/// Top-level error type for the digest pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Approval error: {0}")]
    Approval(#[from] ApprovalError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors. Fatal at startup, never retried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration {path}: {reason}")]
    ParseError { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider {provider} timed out after {after:?}")]
    Timeout { provider: String, after: Duration },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RequestFailed { .. } | Self::RateLimited { .. } | Self::Timeout { .. }
        )
    }
}

/// Content fetch errors (search provider).
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Source {source_name} request failed: {reason}")]
    RequestFailed { source_name: String, reason: String },

    #[error("Source {source_name} timed out after {after:?}")]
    Timeout { source_name: String, after: Duration },

    #[error("Invalid response from source {source_name}: {reason}")]
    InvalidResponse { source_name: String, reason: String },

    #[error("Missing credentials for source {source_name}")]
    MissingCredentials { source_name: String },
}

impl FetchError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RequestFailed { .. } | Self::Timeout { .. })
    }
}

/// Approval gate rejections. Every variant means the operation was denied.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("Operation '{operation}' denied: {reason}")]
    Denied { operation: String, reason: String },

    #[error("Approval for '{operation}' timed out after {timeout:?}")]
    TimedOut { operation: String, timeout: Duration },

    #[error("Approval for '{operation}' was cancelled")]
    Cancelled { operation: String },
}

impl ApprovalError {
    /// Name of the operation that was blocked.
    pub fn operation(&self) -> &str {
        match self {
            Self::Denied { operation, .. }
            | Self::TimedOut { operation, .. }
            | Self::Cancelled { operation } => operation,
        }
    }
}

/// Persistence sink failures. Fatal to the run.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Notification channel errors. Advisory only; never fail a run.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} is not configured: {reason}")]
    NotConfigured { name: String, reason: String },

    #[error("Failed to send on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Pipeline stage errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Stage {stage} failed: {message}")]
    Stage { stage: String, message: String },

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Persistence failed: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
