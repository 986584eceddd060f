//! Streaming chat completions client for OpenAI-compatible APIs.
//!
//! Deliberately narrow: one call, [`OpenAIClient::chat_stream`], which opens a
//! server-sent-events completion and hands back a [`ChatCompletionStream`] of
//! text deltas, usage, and the end-of-stream marker. Dropping the stream
//! releases the underlying HTTP connection.
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use openai_client::{ChatRequest, Message, OpenAIClient, StreamEvent};
//!
//! let client = OpenAIClient::from_env()?;
//! let mut stream = client
//!     .chat_stream(ChatRequest::new("gpt-4o").message(Message::user("Hello!")))
//!     .await?;
//!
//! while let Some(event) = stream.next().await {
//!     match event? {
//!         StreamEvent::Delta(text) => print!("{}", text),
//!         StreamEvent::Usage(usage) => eprintln!("{} tokens", usage.total_tokens),
//!         StreamEvent::Done => break,
//!     }
//! }
//! ```

pub mod error;
pub mod streaming;
pub mod types;

pub use error::{OpenAIError, Result};
pub use streaming::{ChatCompletionStream, StreamEvent, TransportError};
pub use types::*;

use reqwest::{header, Client};
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI API client (streaming completions only).
#[derive(Clone)]
pub struct OpenAIClient {
    http_client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAIClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Create from `OPENAI_API_KEY` (and `OPENAI_BASE_URL` when set).
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| OpenAIError::Config("OPENAI_API_KEY not set".into()))?;
        let client = Self::new(api_key);
        Ok(match std::env::var("OPENAI_BASE_URL") {
            Ok(url) => client.with_base_url(url),
            Err(_) => client,
        })
    }

    /// Point at a proxy or compatible provider.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Open a streamed chat completion.
    ///
    /// Returns once response headers arrive. Errors here mean nothing was
    /// generated; errors yielded by the stream mean generation broke off.
    pub async fn chat_stream(&self, request: ChatRequest) -> Result<ChatCompletionStream> {
        if self.api_key.is_empty() {
            return Err(OpenAIError::Config("API key is empty".into()));
        }

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Opening streamed chat completion"
        );

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(header::ACCEPT, "text/event-stream")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Streaming request failed");
                OpenAIError::Network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %message, "Streaming API error");
            return Err(OpenAIError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(ChatCompletionStream::new(response.bytes_stream()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = OpenAIClient::new("sk-test").with_base_url("https://proxy.local/v1/");
        assert_eq!(client.base_url(), "https://proxy.local/v1");
    }

    #[tokio::test]
    async fn test_empty_key_rejected_before_request() {
        let client = OpenAIClient::new("");
        let err = client
            .chat_stream(ChatRequest::new("gpt-4o").message(Message::user("hi")))
            .await
            .err()
            .unwrap();
        assert!(err.is_request_rejection());
    }
}
