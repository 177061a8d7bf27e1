//! Storage adapters for the ingestion control plane (spec.md §4.A).
//!
//! Three allowlisted facade traits — `GraphStore`, `RelationalStore`,
//! `ObjectStore` — are the only path from the rest of the workspace to
//! persistent state. Each has an in-memory double (for tests and the
//! dependency-free default) and a real backing implementation
//! (Postgres / filesystem).

pub mod error;
pub mod graph;
pub mod memory;
pub mod object;
pub mod postgres;
pub mod relational;
pub mod util;

pub use error::{StoreError, StoreResult};
pub use graph::{GraphStore, PathMatch, RelationshipMergeOutcome};
pub use memory::{InMemoryGraphStore, InMemoryObjectStore, InMemoryRelationalStore};
pub use object::ObjectStore;
pub use postgres::{FilesystemObjectStore, PostgresGraphStore, PostgresRelationalStore};
pub use relational::{
    ArtifactFilter, JobFilter, JobPatch, Pagination, RegenSelector, RelationalStore,
    SourceEmbeddingMatch,
};
pub use util::cosine_similarity;
