use thiserror::Error;

/// Failures of chat operations that happen before (or instead of) a stream.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Token limit exceeded ({used}/{limit})")]
    QuotaExceeded { used: i64, limit: i64 },

    #[error("Not found")]
    NotFound,

    #[error("Not authorized")]
    NotAuthorized,

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}
