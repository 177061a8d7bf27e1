//! Source embedding worker (spec.md §4.F).
//!
//! Sentence-chunks each `Source`, batch-embeds the chunks, and writes
//! hash-verified `SourceEmbedding` rows. Grounded on the platform's
//! `LlmEmbeddingService` batch-embed call shape
//! (`embedding/src/services/embedding.rs`) and on
//! `indexers::services::state`'s per-row fingerprint tracking for the
//! regeneration sweep.

pub mod handler;
pub mod regen;
pub mod worker;

pub use handler::RegenerationHandler;
pub use regen::{RegenOutcome, RegenerationWorker};
pub use worker::{embed_source, SourceEmbedWorker};
