use thiserror::Error;

/// Provider failures map directly onto the two outcomes spec.md §4.B names:
/// transient (retry the job) and fatal (fail the job without retrying).
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Unavailable(_))
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;
