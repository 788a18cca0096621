use thiserror::Error;

/// Errors raised by the LMM Gateway. The transient/permanent split here is
/// what drives the retry policy in `retry.rs` and how callers map LMM
/// failures onto file/job error statuses.
#[derive(Error, Debug)]
pub enum LmmError {
    #[error("transient upstream error: {0}")]
    Transient(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("model-side file processing failed: {0}")]
    FileProcessingFailed(String),

    #[error("model-side file processing timed out after {0:?}")]
    FileProcessingTimeout(std::time::Duration),

    #[error("response was not valid JSON even after tolerant recovery: {0}")]
    UnparseableResponse(String),

    #[error("request transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl LmmError {
    /// Transient infrastructure errors are retried with backoff; permanent
    /// upstream errors are terminal.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Transport(_))
    }
}
