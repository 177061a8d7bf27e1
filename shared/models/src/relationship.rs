use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Directed, typed edge between two Concepts (spec.md §3 "Relationship").
/// `relation_type` is validated against the active allowlist
/// (`stratum-config::RelationshipAllowlist`) before the edge is persisted —
/// the vocabulary itself is a configuration resource, not a fixed enum, so
/// it is modeled here as a plain `String` rather than a closed Rust enum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub from_concept_id: Uuid,
    pub to_concept_id: Uuid,
    pub relation_type: String,
    pub confidence: f32,
    pub provenance: HashSet<Uuid>,
}

/// The default vocabulary named in spec.md §3 — used to seed a fresh
/// `RelationshipAllowlist` when no override is configured.
pub const DEFAULT_RELATIONSHIP_VOCABULARY: &[&str] = &[
    "IMPLIES",
    "SUPPORTS",
    "CONTRADICTS",
    "ENABLES",
    "REQUIRES",
    "CAUSED_BY",
];

/// A labeled edge as produced by the extractor, before concept-id
/// resolution (spec.md §4.B "the returned relationship endpoints are
/// labels").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRelationship {
    pub from_label: String,
    pub to_label: String,
    pub relation_type: String,
    pub confidence: f32,
}
