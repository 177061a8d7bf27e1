use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One ~1000-word ingestion chunk produced by `stratum-chunker`
/// (spec.md §4.C "Ingestion chunking"). This is what flows into the
/// recursive upsert engine (spec.md §4.E) — distinct from the smaller
/// sentence-level `SentenceSpan` used by the source-embedding worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionChunk {
    pub index: usize,
    pub paragraph_index: usize,
    pub text: String,
}

/// A `(index, text, start_byte, end_byte)` tuple from sentence-chunking a
/// `Source.full_text` (spec.md §4.C "Sentence chunking").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentenceSpan {
    pub index: u32,
    pub text: String,
    pub start_byte: u32,
    pub end_byte: u32,
}

/// A submission for ingestion (spec.md §6 "Submission contract"). The
/// `content` variant carries text inline; a file/reference submission
/// resolves to text upstream of the chunker and is out of this crate's
/// scope (spec.md §1 Non-goals).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSubmission {
    pub ontology: String,
    pub content: String,
    pub filename: Option<String>,
    pub target_words: Option<usize>,
    pub overlap_words: Option<usize>,
    pub processing_mode: crate::job::ProcessingMode,
    pub force: bool,
    pub auto_approve: bool,
    pub client_request_id: Option<String>,
}

/// Concepts/relationships extracted from one chunk, as returned by the
/// `Extractor` provider (spec.md §4.B). Relationship endpoints are labels,
/// resolved to concept ids by the upsert engine.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExtractionResult {
    pub concepts: Vec<ExtractedConcept>,
    pub relationships: Vec<crate::relationship::ExtractedRelationship>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedConcept {
    pub label: String,
    pub search_terms: Vec<String>,
    pub description: Option<String>,
    pub quote: String,
}

/// The bounded snapshot of prior concepts assembled for the extractor
/// (spec.md §4.E step 2 — "what makes the upsert recursive").
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExtractionContext {
    pub recent_concepts: Vec<ContextConcept>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConcept {
    pub id: Uuid,
    pub label: String,
    pub description: Option<String>,
}
