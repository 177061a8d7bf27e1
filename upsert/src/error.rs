use thiserror::Error;

/// Crate-boundary error for the recursive upsert engine (spec.md §7 /
/// SPEC_FULL.md "Ambient: Error Handling" — one `thiserror` enum per crate
/// boundary, mirroring `stratum_store::StoreError`).
#[derive(Debug, Error)]
pub enum UpsertError {
    /// Cancellation observed before or during a chunk; callers must not
    /// attribute this to any partial work already committed for the chunk
    /// it interrupted (spec.md §5 "Cancellation").
    #[error("cancelled")]
    Cancelled,

    #[error("provider error: {0}")]
    Provider(#[from] stratum_provider::ProviderError),

    #[error("store error: {0}")]
    Store(#[from] stratum_store::StoreError),
}

pub type UpsertResult<T> = Result<T, UpsertError>;
