use async_trait::async_trait;
use stratum_models::{Concept, Instance, Relationship, Source};
use uuid::Uuid;

use crate::error::StoreResult;

/// One shortest-path result from `GraphStore::find_paths`: the alternating
/// concept/relationship-type sequence spec.md §6 "Path search" returns.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PathMatch {
    pub concept_ids: Vec<Uuid>,
    pub relation_types: Vec<String>,
}

impl PathMatch {
    pub fn hops(&self) -> usize {
        self.relation_types.len()
    }
}

/// Outcome of `upsert_relationship`, used by the upsert engine to decide
/// which progress counter to bump (spec.md §4.E step 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipMergeOutcome {
    Created,
    Merged,
}

/// Allowlisted mutation facade over the property graph (spec.md §4.A). Every
/// method here accepts strongly-typed, pre-validated arguments — the method
/// set *is* the allowlist described by the spec; there is no path from a
/// free-form query string to the graph.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Top-k existing concepts in `ontology` ranked by cosine similarity to
    /// `embedding`, used by `stratum-matcher` (spec.md §4.D step 1).
    async fn top_k_similar_concepts(
        &self,
        ontology: &str,
        embedding: &[f32],
        k: usize,
    ) -> StoreResult<Vec<(Concept, f32)>>;

    async fn find_concept(&self, id: Uuid) -> StoreResult<Option<Concept>>;

    /// Create a brand-new concept. Idempotent by `id` — a retry with the
    /// same id is a no-op success (spec.md §4.A "idempotent by construction").
    async fn create_concept(&self, concept: Concept) -> StoreResult<()>;

    /// Union `terms` into the concept's existing search terms.
    async fn extend_search_terms(&self, concept_id: Uuid, terms: &[String]) -> StoreResult<()>;

    async fn add_provenance(&self, concept_id: Uuid, source_id: Uuid) -> StoreResult<()>;

    async fn append_evidence(&self, instance: Instance) -> StoreResult<()>;

    /// Merge an edge keyed by `(from, to, type)`: union provenance, take the
    /// max confidence if the edge already exists (spec.md §4.E step 5).
    async fn upsert_relationship(
        &self,
        relationship: Relationship,
    ) -> StoreResult<RelationshipMergeOutcome>;

    async fn create_source(&self, source: Source) -> StoreResult<()>;
    async fn get_source(&self, id: Uuid) -> StoreResult<Option<Source>>;
    async fn update_source_full_text(
        &self,
        id: Uuid,
        full_text: String,
        content_hash: String,
    ) -> StoreResult<()>;
    async fn update_source_content_hash(&self, id: Uuid, content_hash: String) -> StoreResult<()>;

    /// Hard-delete an ontology and everything it reaches (concepts,
    /// instances, relationships, sources) — spec.md §6 "Artifact contract"
    /// sibling operation for ontologies.
    async fn delete_ontology_cascade(&self, ontology: &str) -> StoreResult<()>;

    /// Up to `k` shortest paths of at most `max_hops` hops between two
    /// concepts (spec.md §6 "Path search").
    async fn find_paths(
        &self,
        from: Uuid,
        to: Uuid,
        max_hops: u32,
        k: usize,
    ) -> StoreResult<Vec<PathMatch>>;

    /// Concept search across an optional ontology scope (spec.md §6
    /// "Concept search").
    async fn search_concepts(
        &self,
        ontology: Option<&str>,
        query_embedding: &[f32],
        min_similarity: f32,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<(Concept, f32)>>;

    async fn evidence_count(&self, concept_id: Uuid) -> StoreResult<u64>;

    /// Bump the single global `graph_change_counter` by one and return the
    /// new value (spec.md §3 "Artifact" freshness, §5 "single SQL sequence").
    async fn bump_graph_epoch(&self) -> StoreResult<i64>;

    async fn current_graph_epoch(&self) -> StoreResult<i64>;

    /// Recent concepts in `ontology`, most-recently-created first, bounded
    /// to `limit` — the snapshot the upsert engine assembles for the
    /// extractor (spec.md §4.E step 2).
    async fn recent_concepts(&self, ontology: &str, limit: usize) -> StoreResult<Vec<Concept>>;
}
