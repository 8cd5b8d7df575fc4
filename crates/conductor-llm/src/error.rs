//! LLM-related error types.

use thiserror::Error;

/// Errors that can occur while driving an [`crate::provider::LlmProvider`].
#[derive(Debug, Error)]
pub enum LlmError {
    /// API key not configured.
    #[error("API key not configured for {provider}")]
    ApiKeyNotConfigured {
        /// Provider name.
        provider: String,
    },

    /// The underlying request to the provider failed.
    #[error("provider request failed: {0}")]
    RequestFailed(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs} seconds")]
    RateLimitExceeded {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// Provider returned a response this crate could not parse.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    /// Model not recognized by the provider.
    #[error("model not supported: {model}")]
    ModelNotSupported {
        /// Model name.
        model: String,
    },

    /// Context length exceeded.
    #[error("context length exceeded: {current} tokens, max is {max}")]
    ContextLengthExceeded {
        /// Current token count.
        current: usize,
        /// Maximum allowed.
        max: usize,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

/// Result type for LLM operations.
pub type LlmResult<T> = Result<T, LlmError>;
