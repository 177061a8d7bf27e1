use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use stratum_models::{Artifact, Job, JobState, Progress, Source, SourceEmbedding};
use uuid::Uuid;

use crate::error::StoreResult;

/// Sparse patch applied by `update_state_atomically` alongside the state
/// transition itself — every field is optional so callers only set what
/// changed (spec.md §4.H).
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub progress: Option<Progress>,
    pub result: Option<stratum_models::JobResult>,
    pub error: Option<stratum_models::JobError>,
    pub worker_id: Option<Option<String>>,
    pub terminal_at: Option<DateTime<Utc>>,
    pub retry_count: Option<u32>,
    /// `Some(None)` clears the deadline (spec.md §3 "approval deadline is
    /// set iff state = awaiting_approval" — set on transitions out of
    /// `awaiting_approval`); `Some(Some(_))` would set a new deadline, but
    /// no transition currently needs that direction.
    pub approval_deadline: Option<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub state: Option<JobState>,
    pub owner: Option<String>,
    pub ontology: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub limit: usize,
    pub offset: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

/// Which sources a regeneration sweep should consider (spec.md §4.F
/// "parameterized by selector").
#[derive(Debug, Clone)]
pub enum RegenSelector {
    All,
    Ontology(String),
    Source(Uuid),
}

#[derive(Debug, Clone)]
pub struct SourceEmbeddingMatch {
    pub embedding_row: SourceEmbedding,
    pub similarity: f32,
    pub is_stale: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ArtifactFilter {
    pub artifact_type: Option<String>,
    pub owner: Option<String>,
    pub stale_only: Option<bool>,
}

/// Relational facade over jobs, source-embedding rows, and artifact metadata
/// (spec.md §4.A, §4.H). All state transitions go through
/// `update_state_atomically`'s compare-and-swap so two concurrent sweepers
/// or dispatch loops can never both win the same transition
/// (spec.md §8 "At-most-once processing start").
#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn insert_job(&self, job: Job) -> StoreResult<()>;
    async fn load_job(&self, id: Uuid) -> StoreResult<Option<Job>>;
    async fn find_job_by_dedup_key(
        &self,
        dedup_key: &str,
        ontology: &str,
    ) -> StoreResult<Option<Job>>;
    async fn list_jobs(&self, filter: JobFilter, page: Pagination) -> StoreResult<Vec<Job>>;

    /// Compare-and-swap `id`'s state from `from` to `to`, applying `patch`
    /// atomically. Returns `Ok(false)` (not an error) when the job is not
    /// currently in `from` — the caller's transition lost the race.
    async fn update_state_atomically(
        &self,
        id: Uuid,
        from: JobState,
        to: JobState,
        patch: JobPatch,
    ) -> StoreResult<bool>;

    async fn save_progress_snapshot(&self, id: Uuid, progress: Progress) -> StoreResult<()>;

    async fn garbage_collect_jobs(
        &self,
        older_than: DateTime<Utc>,
        states: &[JobState],
    ) -> StoreResult<u64>;

    async fn insert_source_embedding(&self, row: SourceEmbedding) -> StoreResult<()>;
    async fn source_embeddings_for(&self, source_id: Uuid) -> StoreResult<Vec<SourceEmbedding>>;
    async fn delete_source_embeddings_for(&self, source_id: Uuid) -> StoreResult<()>;

    /// Sources needing (re)embedding under `selector`: null `content_hash`,
    /// or current hash differs from what's recorded (spec.md §4.F
    /// "Regeneration").
    async fn stale_or_missing_sources(&self, selector: RegenSelector) -> StoreResult<Vec<Source>>;

    async fn search_source_embeddings(
        &self,
        query_embedding: &[f32],
        limit: usize,
    ) -> StoreResult<Vec<SourceEmbeddingMatch>>;

    async fn create_artifact(&self, artifact: Artifact) -> StoreResult<()>;
    async fn load_artifact(&self, id: Uuid) -> StoreResult<Option<Artifact>>;
    async fn list_artifacts(&self, filter: ArtifactFilter) -> StoreResult<Vec<Artifact>>;
    async fn delete_artifact(&self, id: Uuid) -> StoreResult<Option<Artifact>>;

    /// Typed configuration resource reads (spec.md §4.A) — e.g. an
    /// operator-managed override of the relationship allowlist stored
    /// alongside other rows rather than only in environment variables.
    async fn get_config_value(&self, key: &str) -> StoreResult<Option<Value>>;
    async fn set_config_value(&self, key: &str, value: Value) -> StoreResult<()>;
}
