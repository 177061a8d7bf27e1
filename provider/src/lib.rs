//! Pluggable embedding and extraction providers (spec.md §4.B).
//!
//! No call site in the rest of the workspace references a concrete provider
//! by name — everything goes through the `Embedder` / `Extractor` traits,
//! the same way the platform keeps one `LlmEmbeddingClient` trait behind
//! per-vendor modules (`vector_rag::models::{openai,voyage,cohere,...}`).

pub mod cloud;
pub mod error;
pub mod local;
pub mod mock;

use async_trait::async_trait;
use stratum_models::{ExtractedConcept, ExtractionContext, ExtractionResult};

pub use error::{ProviderError, ProviderResult};

/// Text -> vector embedding, batchable, ideally pure for deterministic test
/// providers (spec.md §4.B "Embedder").
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> ProviderResult<Vec<Vec<f32>>>;
    fn dimensions(&self) -> usize;
    fn model_name(&self) -> &str;
}

/// Text + assembled prior context -> concepts and labeled relationships
/// (spec.md §4.B "Extractor"). The extractor never sees graph ids — only
/// labels; `stratum-upsert` resolves them.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, chunk_text: &str, context: &ExtractionContext) -> ProviderResult<ExtractionResult>;
}

/// Re-exported so callers constructing a mock extraction result don't need
/// a direct `stratum-models` dependency just for this one type.
pub type Concept = ExtractedConcept;
