//! Error taxonomy shared by every stage of the retrieval pipeline.

use thiserror::Error;

pub type RagResult<T> = Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    /// Bad caller input (k = 0, empty text). Raised before any side effect.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The embedding model could not be loaded or reached.
    #[error("Embedding model unavailable: {0}")]
    ModelUnavailable(String),

    /// The language-model backend is unreachable or kept failing after retries.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The backend rejected the request as malformed (non-retryable 4xx).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A persisted index or chunk store could not be decoded.
    #[error("Index corrupt: {0}")]
    IndexCorrupt(String),

    /// The mandatory prompt content (preamble + query) exceeds the budget.
    #[error("Prompt too large: mandatory content needs {required} chars, budget is {budget}")]
    PromptTooLarge { required: usize, budget: usize },

    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// Embedding dimension or model identity does not match the index.
    #[error("Configuration mismatch: {0}")]
    ConfigMismatch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RagError {
    /// Whether a single failed attempt may succeed if retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RagError::ServiceUnavailable(_) | RagError::RateLimited(_) | RagError::Timeout(_)
        )
    }
}
