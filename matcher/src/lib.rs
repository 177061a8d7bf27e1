//! Vector concept matcher (spec.md §4.D).
//!
//! Grounded on the platform's entity-resolution engine
//! (`graph_rag::entity_resolution::resolver::EntityResolver`): retrieve
//! candidates, score, take the best above a confidence threshold. This
//! crate narrows that to a single cosine-similarity lookup against
//! `GraphStore::top_k_similar_concepts` plus the merge/suggest/no-match
//! three-way split spec.md §4.D specifies.

use std::sync::Arc;

use stratum_config::MatchThresholds;
use stratum_models::Concept;
use stratum_store::{GraphStore, StoreResult};

const DEFAULT_TOP_K: usize = 20;

/// Outcome of matching a candidate concept against the existing graph.
#[derive(Debug, Clone)]
pub enum MatchDecision {
    /// Similarity >= merge threshold: treat as the same concept.
    Matched(Concept, f32),
    /// Similarity in `[suggest, merge)`: ambiguous; the ingestion pipeline
    /// treats this as `NoMatch`, but the MCP tool surface (out of scope
    /// here) surfaces the candidates for a human to disambiguate.
    Ambiguous(Vec<(Concept, f32)>),
    /// Similarity < suggest threshold, or no existing concepts at all.
    NoMatch,
}

pub struct VectorMatcher {
    store: Arc<dyn GraphStore>,
    thresholds: MatchThresholds,
}

impl VectorMatcher {
    pub fn new(store: Arc<dyn GraphStore>, thresholds: MatchThresholds) -> Self {
        Self { store, thresholds }
    }

    /// Run the full §4.D decision procedure for `(label, embedding)` within
    /// `ontology`:
    /// 1. top-k by cosine similarity,
    /// 2. take the highest-similarity candidate as `best`,
    /// 3. `best.score >= merge` => `Matched`,
    /// 4. `best.score >= suggest` => `Ambiguous(top_3)`,
    /// 5. else `NoMatch`.
    ///
    /// Tie-breaks on exact score ties favor the lexicographically smaller
    /// concept id, so repeated runs against the same snapshot are stable
    /// (spec.md §4.D "Tie-breaks", §8 "Concept matcher determinism").
    pub async fn match_candidate(&self, ontology: &str, embedding: &[f32]) -> StoreResult<MatchDecision> {
        let mut candidates = self.store.top_k_similar_concepts(ontology, embedding, DEFAULT_TOP_K).await?;
        if candidates.is_empty() {
            return Ok(MatchDecision::NoMatch);
        }

        candidates.sort_by(|(a_concept, a_score), (b_concept, b_score)| {
            b_score
                .partial_cmp(a_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a_concept.id.cmp(&b_concept.id))
        });

        let (best_concept, best_score) = candidates[0].clone();

        if best_score >= self.thresholds.merge {
            Ok(MatchDecision::Matched(best_concept, best_score))
        } else if best_score >= self.thresholds.suggest {
            Ok(MatchDecision::Ambiguous(candidates.into_iter().take(3).collect()))
        } else {
            Ok(MatchDecision::NoMatch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_store::InMemoryGraphStore;
    use uuid::Uuid;

    fn concept(id: Uuid, ontology: &str, label: &str, embedding: Vec<f32>) -> Concept {
        Concept {
            id,
            ontology: ontology.to_string(),
            label: label.to_string(),
            search_terms: vec![],
            description: None,
            embedding,
            provenance: Default::default(),
        }
    }

    #[tokio::test]
    async fn exact_match_above_merge_threshold() {
        let store = Arc::new(InMemoryGraphStore::new());
        let existing = concept(Uuid::new_v4(), "T", "Distributed Authority", vec![1.0, 0.0, 0.0]);
        store.create_concept(existing.clone()).await.unwrap();

        let matcher = VectorMatcher::new(store, MatchThresholds::default());
        let decision = matcher.match_candidate("T", &[1.0, 0.0, 0.0]).await.unwrap();
        match decision {
            MatchDecision::Matched(c, score) => {
                assert_eq!(c.id, existing.id);
                assert!(score > 0.99);
            }
            other => panic!("expected Matched, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn orthogonal_candidate_is_no_match() {
        let store = Arc::new(InMemoryGraphStore::new());
        store
            .create_concept(concept(Uuid::new_v4(), "T", "Other", vec![1.0, 0.0, 0.0]))
            .await
            .unwrap();

        let matcher = VectorMatcher::new(store, MatchThresholds::default());
        let decision = matcher.match_candidate("T", &[0.0, 1.0, 0.0]).await.unwrap();
        assert!(matches!(decision, MatchDecision::NoMatch));
    }

    #[tokio::test]
    async fn empty_graph_is_no_match() {
        let store = Arc::new(InMemoryGraphStore::new());
        let matcher = VectorMatcher::new(store, MatchThresholds::default());
        let decision = matcher.match_candidate("T", &[1.0, 0.0, 0.0]).await.unwrap();
        assert!(matches!(decision, MatchDecision::NoMatch));
    }

    #[tokio::test]
    async fn determinism_across_repeated_queries() {
        let store = Arc::new(InMemoryGraphStore::new());
        store
            .create_concept(concept(Uuid::new_v4(), "T", "A", vec![0.9, 0.1, 0.0]))
            .await
            .unwrap();
        store
            .create_concept(concept(Uuid::new_v4(), "T", "B", vec![0.1, 0.9, 0.0]))
            .await
            .unwrap();

        let matcher = VectorMatcher::new(store, MatchThresholds::default());
        let first = matcher.match_candidate("T", &[0.9, 0.1, 0.0]).await.unwrap();
        let second = matcher.match_candidate("T", &[0.9, 0.1, 0.0]).await.unwrap();
        let id_of = |d: MatchDecision| match d {
            MatchDecision::Matched(c, _) => Some(c.id),
            _ => None,
        };
        assert_eq!(id_of(first), id_of(second));
    }
}
