use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The index could not be reached. Transient: retried with backoff.
    #[error("regulatory index unavailable: {0}")]
    Unavailable(String),

    #[error("index query timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Embedding(#[from] verity_core::EmbedError),

    /// The index returned a row the client cannot interpret.
    #[error("invalid index hit: {0}")]
    InvalidHit(String),

    #[cfg(feature = "lancedb")]
    #[error("lancedb error: {0}")]
    Lance(#[from] lancedb::Error),

    #[cfg(feature = "lancedb")]
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

impl RetrievalError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::Timeout(_) => true,
            #[cfg(feature = "lancedb")]
            Self::Lance(_) => true,
            _ => false,
        }
    }
}
