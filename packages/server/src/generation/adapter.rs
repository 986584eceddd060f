//! Provider-agnostic view of one streamed generation.
//!
//! A [`GenerationSource`] opens a call; the returned [`GenerationHandle`] is
//! pulled one [`GenerationDelta`] at a time until a terminal delta arrives.
//! Nothing here retries: one open, one attempt.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("failed to open generation stream: {0}")]
    Open(String),
}

/// Speaker of a context message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextMessage {
    pub role: ContextRole,
    pub content: String,
}

impl ContextMessage {
    pub fn new(role: ContextRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Everything the provider needs to produce a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationContext {
    pub model: String,
    pub messages: Vec<ContextMessage>,
}

/// One pulled step of a generation.
///
/// Terminal when `done` is set or `error` is present. `usage` is the
/// provider's own completion token count, reported on the terminal delta
/// when the provider supplies one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationDelta {
    pub text: String,
    pub done: bool,
    pub error: Option<String>,
    pub usage: Option<i64>,
}

impl GenerationDelta {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn done() -> Self {
        Self {
            done: true,
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, usage: Option<i64>) -> Self {
        self.usage = usage;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.done || self.error.is_some()
    }
}

#[async_trait]
pub trait GenerationSource: Send + Sync {
    async fn open(
        &self,
        context: GenerationContext,
    ) -> Result<Box<dyn GenerationHandle>, GenerationError>;
}

/// A single in-flight upstream call.
#[async_trait]
pub trait GenerationHandle: Send {
    /// Next delta. After a terminal delta every call returns a done delta.
    async fn next(&mut self) -> GenerationDelta;

    /// Release upstream resources. Safe to call any number of times,
    /// including after natural completion.
    fn close(&mut self);
}
