use thiserror::Error;

/// Crate-boundary error for every storage adapter (spec.md §7 / SPEC_FULL.md
/// "Error Handling Design" — one `thiserror` enum per crate boundary,
/// following `graph_rag::errors::GraphError`'s shape).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("object store I/O error: {0}")]
    ObjectIo(#[from] std::io::Error),

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
