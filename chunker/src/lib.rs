//! Text chunking for the ingestion pipeline (spec.md §4.C).
//!
//! Two independent regimes, grounded on the same paragraph-then-fallback
//! strategy the platform's chunking service uses for prose: `ingestion`
//! produces the ~1000-word chunks the recursive upsert engine consumes,
//! `sentence` produces the small, tightly-bounded chunks the source
//! embedding worker writes one row per.

pub mod ingestion;
pub mod sentence;

pub use ingestion::chunk_ingestion;
pub use sentence::chunk_sentences;
