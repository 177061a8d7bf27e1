use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use stratum_models::{Concept, Instance, Relationship, Source};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::graph::{GraphStore, PathMatch, RelationshipMergeOutcome};
use crate::util::cosine_similarity;

/// In-memory `GraphStore` double, following `indexers::services::state`'s
/// `DashMap`-backed store shape — used by tests and by the mock provider
/// pipeline so the upsert engine can run without a database
/// (SPEC_FULL.md "Ambient: Testing").
#[derive(Default, Clone)]
pub struct InMemoryGraphStore {
    concepts: Arc<DashMap<Uuid, Concept>>,
    /// Creation order, used for `recent_concepts` (most-recent-first).
    concept_order: Arc<RwLock<Vec<Uuid>>>,
    instances: Arc<DashMap<Uuid, Instance>>,
    /// Keyed by `(from, to, type)` — the relationship merge key from
    /// spec.md §4.E step 5.
    relationships: Arc<DashMap<(Uuid, Uuid, String), Relationship>>,
    sources: Arc<DashMap<Uuid, Source>>,
    epoch: Arc<AtomicI64>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn top_k_similar_concepts(
        &self,
        ontology: &str,
        embedding: &[f32],
        k: usize,
    ) -> StoreResult<Vec<(Concept, f32)>> {
        let mut scored: Vec<(Concept, f32)> = self
            .concepts
            .iter()
            .filter(|entry| entry.value().ontology == ontology)
            .map(|entry| {
                let concept = entry.value().clone();
                let score = cosine_similarity(&concept.embedding, embedding);
                (concept, score)
            })
            .collect();

        // Highest similarity first; ties broken by lexicographically smaller
        // concept id, matching spec.md §4.D's stable tie-break.
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn find_concept(&self, id: Uuid) -> StoreResult<Option<Concept>> {
        Ok(self.concepts.get(&id).map(|e| e.value().clone()))
    }

    async fn create_concept(&self, concept: Concept) -> StoreResult<()> {
        if self.concepts.contains_key(&concept.id) {
            return Ok(());
        }
        let id = concept.id;
        self.concepts.insert(id, concept);
        self.concept_order.write().push(id);
        Ok(())
    }

    async fn extend_search_terms(&self, concept_id: Uuid, terms: &[String]) -> StoreResult<()> {
        let mut entry = self
            .concepts
            .get_mut(&concept_id)
            .ok_or_else(|| StoreError::NotFound(format!("concept {concept_id}")))?;
        let mut existing: HashSet<String> = entry.search_terms.iter().cloned().collect();
        for term in terms {
            existing.insert(term.clone());
        }
        entry.search_terms = existing.into_iter().collect();
        Ok(())
    }

    async fn add_provenance(&self, concept_id: Uuid, source_id: Uuid) -> StoreResult<()> {
        let mut entry = self
            .concepts
            .get_mut(&concept_id)
            .ok_or_else(|| StoreError::NotFound(format!("concept {concept_id}")))?;
        entry.provenance.insert(source_id);
        Ok(())
    }

    async fn append_evidence(&self, instance: Instance) -> StoreResult<()> {
        self.instances.insert(instance.id, instance);
        Ok(())
    }

    async fn upsert_relationship(
        &self,
        relationship: Relationship,
    ) -> StoreResult<RelationshipMergeOutcome> {
        let key = (
            relationship.from_concept_id,
            relationship.to_concept_id,
            relationship.relation_type.clone(),
        );
        match self.relationships.get_mut(&key) {
            Some(mut existing) => {
                existing.confidence = existing.confidence.max(relationship.confidence);
                for p in relationship.provenance {
                    existing.provenance.insert(p);
                }
                Ok(RelationshipMergeOutcome::Merged)
            }
            None => {
                self.relationships.insert(key, relationship);
                Ok(RelationshipMergeOutcome::Created)
            }
        }
    }

    async fn create_source(&self, source: Source) -> StoreResult<()> {
        self.sources.insert(source.id, source);
        Ok(())
    }

    async fn get_source(&self, id: Uuid) -> StoreResult<Option<Source>> {
        Ok(self.sources.get(&id).map(|e| e.value().clone()))
    }

    async fn update_source_full_text(
        &self,
        id: Uuid,
        full_text: String,
        content_hash: String,
    ) -> StoreResult<()> {
        let mut entry = self
            .sources
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("source {id}")))?;
        entry.full_text = full_text;
        entry.content_hash = Some(content_hash);
        Ok(())
    }

    async fn update_source_content_hash(&self, id: Uuid, content_hash: String) -> StoreResult<()> {
        let mut entry = self
            .sources
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("source {id}")))?;
        entry.content_hash = Some(content_hash);
        Ok(())
    }

    async fn delete_ontology_cascade(&self, ontology: &str) -> StoreResult<()> {
        let dead: Vec<Uuid> = self
            .concepts
            .iter()
            .filter(|e| e.value().ontology == ontology)
            .map(|e| *e.key())
            .collect();
        for id in &dead {
            self.concepts.remove(id);
            self.instances.retain(|_, i| i.concept_id != *id);
        }
        self.relationships
            .retain(|(from, to, _), _| !dead.contains(from) && !dead.contains(to));
        self.sources.retain(|_, s| s.ontology != ontology);
        self.concept_order.write().retain(|id| !dead.contains(id));
        Ok(())
    }

    async fn find_paths(
        &self,
        from: Uuid,
        to: Uuid,
        max_hops: u32,
        k: usize,
    ) -> StoreResult<Vec<PathMatch>> {
        // Breadth-first enumeration of simple paths up to max_hops, mirroring
        // the bounded recursive-CTE shape of
        // `graph_rag::graph_db::operations::find_related_entities`.
        let mut found = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back((vec![from], Vec::<String>::new()));

        while let Some((path, rel_types)) = queue.pop_front() {
            if found.len() >= k {
                break;
            }
            let current = *path.last().unwrap();
            if current == to && path.len() > 1 {
                found.push(PathMatch {
                    concept_ids: path.clone(),
                    relation_types: rel_types.clone(),
                });
                continue;
            }
            if (path.len() as u32 - 1) >= max_hops {
                continue;
            }
            for entry in self.relationships.iter() {
                let (f, t, rel_type) = entry.key();
                if *f == current && !path.contains(t) {
                    let mut next_path = path.clone();
                    next_path.push(*t);
                    let mut next_rels = rel_types.clone();
                    next_rels.push(rel_type.clone());
                    queue.push_back((next_path, next_rels));
                }
            }
        }
        Ok(found)
    }

    async fn search_concepts(
        &self,
        ontology: Option<&str>,
        query_embedding: &[f32],
        min_similarity: f32,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<(Concept, f32)>> {
        let mut scored: Vec<(Concept, f32)> = self
            .concepts
            .iter()
            .filter(|e| ontology.map(|o| e.value().ontology == o).unwrap_or(true))
            .map(|e| {
                let c = e.value().clone();
                let score = cosine_similarity(&c.embedding, query_embedding);
                (c, score)
            })
            .filter(|(_, score)| *score >= min_similarity)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().skip(offset).take(limit).collect())
    }

    async fn evidence_count(&self, concept_id: Uuid) -> StoreResult<u64> {
        Ok(self
            .instances
            .iter()
            .filter(|e| e.value().concept_id == concept_id)
            .count() as u64)
    }

    async fn bump_graph_epoch(&self) -> StoreResult<i64> {
        Ok(self.epoch.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn current_graph_epoch(&self) -> StoreResult<i64> {
        Ok(self.epoch.load(Ordering::SeqCst))
    }

    async fn recent_concepts(&self, ontology: &str, limit: usize) -> StoreResult<Vec<Concept>> {
        let order = self.concept_order.read();
        let mut out = Vec::new();
        for id in order.iter().rev() {
            if out.len() >= limit {
                break;
            }
            if let Some(c) = self.concepts.get(id) {
                if c.ontology == ontology {
                    out.push(c.clone());
                }
            }
        }
        Ok(out)
    }
}
