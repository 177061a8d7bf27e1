//! The recursive upsert engine (spec.md §4.E): per ingestion chunk, embed,
//! assemble recent-concept context, extract, match-or-create concepts,
//! resolve and merge relationships, then advance the graph epoch. Grounded
//! on `graph_rag::services::chunk_processor::ChunkProcessor` for the
//! per-chunk control flow and `graph_rag::knowledge_fusion::fusion_engine`
//! for the match-or-create step, generalized here to a vocabulary-checked
//! relationship pipeline driven by `stratum-matcher` and the storage
//! allowlist in `stratum-store`.

pub mod engine;
pub mod error;
pub mod handler;

pub use engine::{DocumentOutcome, UpsertEngine};
pub use error::{UpsertError, UpsertResult};
pub use handler::{IngestFileHandler, IngestionHandler};
