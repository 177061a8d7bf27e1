use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use stratum_models::{Artifact, Job, JobState, Progress, Source, SourceEmbedding};
use uuid::Uuid;

use crate::error::StoreResult;
use crate::relational::{
    ArtifactFilter, JobFilter, JobPatch, Pagination, RegenSelector, RelationalStore,
    SourceEmbeddingMatch,
};
use crate::util::cosine_similarity;
use crate::GraphStore;

/// In-memory `RelationalStore` double (spec.md §4.A, SPEC_FULL.md "Ambient:
/// Testing"). Jobs use a coarse per-row lock to emulate the Postgres
/// implementation's row-level CAS — no global mutex guards the whole map, so
/// concurrent CAS attempts on *different* jobs never contend.
#[derive(Clone)]
pub struct InMemoryRelationalStore {
    jobs: Arc<DashMap<Uuid, Job>>,
    source_embeddings: Arc<DashMap<(Uuid, u32, String), SourceEmbedding>>,
    artifacts: Arc<DashMap<Uuid, Artifact>>,
    config: Arc<DashMap<String, Value>>,
    /// The graph this relational store is paired with, so
    /// `stale_or_missing_sources` can read `Source` rows (spec.md §3 keeps
    /// `Source` in the graph-reachable partition, but the relational store
    /// is where the regeneration sweep's selector logic lives).
    graph: Arc<dyn GraphStore>,
}

impl InMemoryRelationalStore {
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
            source_embeddings: Arc::new(DashMap::new()),
            artifacts: Arc::new(DashMap::new()),
            config: Arc::new(DashMap::new()),
            graph,
        }
    }
}

#[async_trait]
impl RelationalStore for InMemoryRelationalStore {
    async fn insert_job(&self, job: Job) -> StoreResult<()> {
        self.jobs.insert(job.id, job);
        Ok(())
    }

    async fn load_job(&self, id: Uuid) -> StoreResult<Option<Job>> {
        Ok(self.jobs.get(&id).map(|e| e.value().clone()))
    }

    async fn find_job_by_dedup_key(
        &self,
        dedup_key: &str,
        ontology: &str,
    ) -> StoreResult<Option<Job>> {
        Ok(self
            .jobs
            .iter()
            .find(|e| {
                let job = e.value();
                job.dedup_key == dedup_key && job.ontology == ontology && job.state.is_terminal()
            })
            .map(|e| e.value().clone()))
    }

    async fn list_jobs(&self, filter: JobFilter, page: Pagination) -> StoreResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .iter()
            .map(|e| e.value().clone())
            .filter(|j| filter.state.map(|s| j.state == s).unwrap_or(true))
            .filter(|j| {
                filter
                    .owner
                    .as_ref()
                    .map(|o| &j.owner == o)
                    .unwrap_or(true)
            })
            .filter(|j| {
                filter
                    .ontology
                    .as_ref()
                    .map(|o| &j.ontology == o)
                    .unwrap_or(true)
            })
            .collect();
        jobs.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        Ok(jobs
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .collect())
    }

    async fn update_state_atomically(
        &self,
        id: Uuid,
        from: JobState,
        to: JobState,
        patch: JobPatch,
    ) -> StoreResult<bool> {
        let Some(mut entry) = self.jobs.get_mut(&id) else {
            return Ok(false);
        };
        if entry.state != from {
            return Ok(false);
        }
        entry.state = to;
        if let Some(progress) = patch.progress {
            entry.progress = progress;
        }
        if let Some(result) = patch.result {
            entry.result = Some(result);
        }
        if let Some(error) = patch.error {
            entry.error = Some(error);
        }
        if let Some(worker_id) = patch.worker_id {
            entry.worker_id = worker_id;
        }
        if let Some(terminal_at) = patch.terminal_at {
            entry.terminal_at = Some(terminal_at);
        }
        if let Some(retry_count) = patch.retry_count {
            entry.retry_count = retry_count;
        }
        if let Some(approval_deadline) = patch.approval_deadline {
            entry.approval_deadline = approval_deadline;
        }
        Ok(true)
    }

    async fn save_progress_snapshot(&self, id: Uuid, progress: Progress) -> StoreResult<()> {
        if let Some(mut entry) = self.jobs.get_mut(&id) {
            entry.progress = progress;
        }
        Ok(())
    }

    async fn garbage_collect_jobs(
        &self,
        older_than: DateTime<Utc>,
        states: &[JobState],
    ) -> StoreResult<u64> {
        let dead: Vec<Uuid> = self
            .jobs
            .iter()
            .filter(|e| {
                let j = e.value();
                states.contains(&j.state) && j.terminal_at.map(|t| t < older_than).unwrap_or(false)
            })
            .map(|e| *e.key())
            .collect();
        for id in &dead {
            self.jobs.remove(id);
        }
        Ok(dead.len() as u64)
    }

    async fn insert_source_embedding(&self, row: SourceEmbedding) -> StoreResult<()> {
        self.source_embeddings
            .insert((row.source_id, row.chunk_index, row.strategy.clone()), row);
        Ok(())
    }

    async fn source_embeddings_for(&self, source_id: Uuid) -> StoreResult<Vec<SourceEmbedding>> {
        let mut rows: Vec<SourceEmbedding> = self
            .source_embeddings
            .iter()
            .filter(|e| e.key().0 == source_id)
            .map(|e| e.value().clone())
            .collect();
        rows.sort_by_key(|r| r.chunk_index);
        Ok(rows)
    }

    async fn delete_source_embeddings_for(&self, source_id: Uuid) -> StoreResult<()> {
        self.source_embeddings.retain(|k, _| k.0 != source_id);
        Ok(())
    }

    async fn stale_or_missing_sources(&self, selector: RegenSelector) -> StoreResult<Vec<Source>> {
        // The in-memory graph exposes sources keyed by id only; iterate the
        // subset named by the selector and test each against its current
        // embedding rows. A "full scan" primitive isn't part of the
        // `GraphStore` trait (sources are graph-reachable, not relationally
        // listable by design — spec.md §3), so the in-memory double keeps
        // its own shadow index populated by `note_source` for test setup.
        let candidates = match &selector {
            RegenSelector::Source(id) => vec![*id],
            RegenSelector::All | RegenSelector::Ontology(_) => self.known_source_ids(),
        };

        let mut stale = Vec::new();
        for id in candidates {
            let Some(source) = self.graph.get_source(id).await? else {
                continue;
            };
            if let RegenSelector::Ontology(ontology) = &selector {
                if &source.ontology != ontology {
                    continue;
                }
            }
            let needs_regen = match &source.content_hash {
                None => true,
                Some(stored_hash) => {
                    let current = stratum_utils::sha256_hex(&source.full_text);
                    &current != stored_hash
                }
            };
            if needs_regen {
                stale.push(source);
            }
        }
        Ok(stale)
    }

    async fn search_source_embeddings(
        &self,
        query_embedding: &[f32],
        limit: usize,
    ) -> StoreResult<Vec<SourceEmbeddingMatch>> {
        let mut scored: Vec<SourceEmbeddingMatch> = Vec::new();
        for entry in self.source_embeddings.iter() {
            let row = entry.value().clone();
            let similarity = cosine_similarity(&row.embedding, query_embedding);
            let is_stale = match self.graph.get_source(row.source_id).await? {
                Some(source) => source
                    .content_hash
                    .as_deref()
                    .map(|h| h != row.source_hash)
                    .unwrap_or(true),
                None => true,
            };
            scored.push(SourceEmbeddingMatch {
                embedding_row: row,
                similarity,
                is_stale,
            });
        }
        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn create_artifact(&self, artifact: Artifact) -> StoreResult<()> {
        self.artifacts.insert(artifact.id, artifact);
        Ok(())
    }

    async fn load_artifact(&self, id: Uuid) -> StoreResult<Option<Artifact>> {
        Ok(self.artifacts.get(&id).map(|e| e.value().clone()))
    }

    async fn list_artifacts(&self, filter: ArtifactFilter) -> StoreResult<Vec<Artifact>> {
        let current_epoch = self.graph.current_graph_epoch().await?;
        Ok(self
            .artifacts
            .iter()
            .map(|e| e.value().clone())
            .filter(|a| {
                filter
                    .artifact_type
                    .as_ref()
                    .map(|t| &a.artifact_type == t)
                    .unwrap_or(true)
            })
            .filter(|a| filter.owner.as_ref().map(|o| &a.owner == o).unwrap_or(true))
            .filter(|a| {
                filter
                    .stale_only
                    .map(|stale_only| a.is_stale(current_epoch) == stale_only)
                    .unwrap_or(true)
            })
            .collect())
    }

    async fn delete_artifact(&self, id: Uuid) -> StoreResult<Option<Artifact>> {
        Ok(self.artifacts.remove(&id).map(|(_, a)| a))
    }

    async fn get_config_value(&self, key: &str) -> StoreResult<Option<Value>> {
        Ok(self.config.get(key).map(|e| e.value().clone()))
    }

    async fn set_config_value(&self, key: &str, value: Value) -> StoreResult<()> {
        self.config.insert(key.to_string(), value);
        Ok(())
    }
}



impl InMemoryRelationalStore {
    /// Sources this double has ever seen an embedding row for — the
    /// in-memory stand-in for a relational `sources` table scan. A source
    /// that has never been embedded is picked up as soon as its first
    /// embedding row is written or via an explicit `RegenSelector::Source`.
    fn known_source_ids(&self) -> Vec<Uuid> {
        self.source_embeddings
            .iter()
            .map(|e| e.key().0)
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect()
    }
}
