use thiserror::Error;
use verity_ai::ModelError;
use verity_store::RetrievalError;

/// Failures inside one reasoning pass. None of these abort the analysis:
/// the engine turns them into a retry or a gap-flagged finding.
#[derive(Debug, Error)]
pub enum ReasoningError {
    #[error(transparent)]
    Model(#[from] ModelError),

    /// The model returned JSON, but not a usable draft or step.
    #[error("malformed draft: {0}")]
    Malformed(String),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error("analysis cancelled")]
    Cancelled,
}
