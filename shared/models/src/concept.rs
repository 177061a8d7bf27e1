use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// A deduplicated semantic unit produced by the recursive upsert engine
/// (spec.md §3 "Concept"). Identity is `id`; matching on re-extraction is
/// handled by `stratum-matcher`, never by label equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Concept {
    pub id: Uuid,
    pub ontology: String,
    pub label: String,
    pub search_terms: Vec<String>,
    pub description: Option<String>,
    /// Dimensionality must equal the active embedding config's dimension —
    /// enforced at write time by `stratum-store`.
    pub embedding: Vec<f32>,
    pub provenance: HashSet<Uuid>,
}

impl Concept {
    pub fn embed_text(&self) -> String {
        if self.search_terms.is_empty() {
            self.label.clone()
        } else {
            format!("{} {}", self.label, self.search_terms.join(" "))
        }
    }
}

/// An exact quote from a `Source` supporting a `Concept` (spec.md §3
/// "Instance (Evidence)"). The soft invariant that `quote` is a substring of
/// the source's `full_text` is asserted in tests, not enforced at insert
/// time (LLM extractors occasionally normalize whitespace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: Uuid,
    pub concept_id: Uuid,
    pub source_id: Uuid,
    pub quote: String,
}
