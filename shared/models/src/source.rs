use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unit of chunked input text (spec.md §3 "Source"). Mutated only when the
/// owning document's full text is regenerated, which invalidates all
/// derived `SourceEmbedding` rows (spec.md §4.F).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub ontology: String,
    pub document_name: String,
    pub paragraph_index: usize,
    pub full_text: String,
    /// sha256 of `full_text`; `None` for legacy sources until backfilled by
    /// the regeneration worker.
    pub content_hash: Option<String>,
    pub object_store_pointer: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One row per embedding chunk of a `Source` (spec.md §3 "SourceEmbedding").
/// Unique on `(source_id, chunk_index, strategy)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEmbedding {
    pub source_id: Uuid,
    pub chunk_index: u32,
    pub strategy: String,
    pub start_byte: u32,
    pub end_byte: u32,
    pub chunk_text: String,
    pub chunk_hash: String,
    pub source_hash: String,
    pub embedding: Vec<f32>,
    pub model: String,
    pub dims: usize,
    pub created_at: DateTime<Utc>,
}

impl SourceEmbedding {
    /// True when the owning `Source`'s current hash no longer matches the
    /// hash recorded at embedding time (spec.md §3 "Staleness").
    pub fn is_stale(&self, current_source_hash: &str) -> bool {
        self.source_hash != current_source_hash
    }
}
