//! Error types for the streaming client.

use thiserror::Error;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, OpenAIError>;

/// Client errors.
#[derive(Debug, Error)]
pub enum OpenAIError {
    /// Missing API key or invalid settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection failed, reset, or timed out mid-stream
    #[error("Network error: {0}")]
    Network(String),

    /// Non-2xx response (rate limit, invalid model, bad request)
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Malformed SSE frame or unexpected JSON
    #[error("Parse error: {0}")]
    Parse(String),
}

impl OpenAIError {
    /// Whether the failure happened before any bytes were streamed back.
    pub fn is_request_rejection(&self) -> bool {
        matches!(self, OpenAIError::Config(_) | OpenAIError::Api { .. })
    }
}
