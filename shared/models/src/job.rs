use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// What kind of worker a job dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    IngestText,
    IngestFile,
    IngestImage,
    Restore,
    RegenerateEmbeddings,
    Analysis,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::IngestText => "ingest_text",
            JobKind::IngestFile => "ingest_file",
            JobKind::IngestImage => "ingest_image",
            JobKind::Restore => "restore",
            JobKind::RegenerateEmbeddings => "regenerate_embeddings",
            JobKind::Analysis => "analysis",
        }
    }
}

/// Chunk processing order for the ingestion pipeline (spec.md §4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    #[default]
    Serial,
    Parallel,
}

/// The job state machine. Transitions are monotonic and one-directional —
/// see `JobState::can_transition_to` and spec.md §8 "Monotonic state
/// progression".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Submitted,
    Pending,
    AwaitingApproval,
    Approved,
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled | JobState::Expired
        )
    }

    /// Whether `self -> next` is a legal edge in the state machine described
    /// in spec.md §8:
    /// `submitted -> (pending -> awaiting_approval?)? -> approved -> queued
    ///  -> processing -> {completed|failed|cancelled|expired}`
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Submitted, Pending) => true,
            (Submitted, AwaitingApproval) => true,
            (Submitted, Approved) => true, // auto-approve skips the gate
            (Pending, AwaitingApproval) => true,
            (Pending, Approved) => true,
            (AwaitingApproval, Approved) => true,
            (AwaitingApproval, Expired) => true,
            (Approved, Queued) => true,
            (Queued, Processing) => true,
            (Processing, Completed) => true,
            (Processing, Failed) => true,
            (Processing, Cancelled) => true,
            // Cancellation / failure can be requested from any non-terminal state.
            (s, Cancelled) if !s.is_terminal() => true,
            (s, Failed) if !s.is_terminal() => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CostEstimate {
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub approx_cost_usd: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategy {
    Paragraph,
    SlidingWindow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPlan {
    pub count: usize,
    pub target_words: usize,
    pub overlap_words: usize,
    pub strategy: ChunkingStrategy,
}

impl Default for ChunkPlan {
    fn default() -> Self {
        Self {
            count: 0,
            target_words: 1000,
            overlap_words: 200,
            strategy: ChunkingStrategy::Paragraph,
        }
    }
}

/// A running snapshot of worker progress for a job (spec.md §4.K).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Progress {
    pub stage: String,
    pub items_done: usize,
    pub items_total: usize,
    /// Per-stage counters: concepts_created, concepts_matched,
    /// relationships_created, relationships_merged, evidence_appended, ...
    pub counters: HashMap<String, u64>,
    pub last_update: Option<DateTime<Utc>>,
}

impl Progress {
    pub fn bump(&mut self, counter: &str, delta: u64) {
        *self.counters.entry(counter.to_string()).or_insert(0) += delta;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IngestionStats {
    pub chunks_done: usize,
    pub chunks_total: usize,
    pub concepts_created: u64,
    pub concepts_matched: u64,
    pub relationships_created: u64,
    pub relationships_merged: u64,
    pub relationships_dropped: u64,
    pub evidence_appended: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub stats: IngestionStats,
    pub warnings: Vec<String>,
    /// For dedup hits: the job id whose result this one references instead
    /// of reprocessing (spec.md §4.E "duplicate detection").
    pub duplicate_of: Option<Uuid>,
}

/// Error taxonomy kinds from spec.md §7. Stored, not the internal
/// `thiserror` type of whichever crate raised it — see SPEC_FULL.md
/// "Ambient: Logging"/"Error Handling Design".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    ProviderUnavailable,
    ProviderInvalidRequest,
    VocabularyViolation,
    IntegrityViolation,
    Cancelled,
    Expired,
    Stalled,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
    pub detail: Option<serde_json::Value>,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }
}

/// Where the raw submitted text for an ingestion job lives (spec.md §6
/// persisted-state "Object store namespaces" already routes original
/// documents through `sources/{ontology}/{filename}" — `Job` just needs a
/// handle back to it, following the same inline-vs-pointer routing
/// `ArtifactPayload` uses for computed results).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobInput {
    Inline(String),
    ObjectStoreKey(String),
}

/// A durable unit of work. See spec.md §3 "Job" for the full invariant set:
/// state progresses monotonically along one path; `approval_deadline` is
/// set iff `state == AwaitingApproval`; `result` is non-empty iff
/// `state == Completed`; `error` is non-empty iff `state` is one of
/// `{Failed, Cancelled, Expired}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub owner: String,
    pub ontology: String,
    pub submitted_at: DateTime<Utc>,
    pub state: JobState,
    pub cost_estimate: Option<CostEstimate>,
    pub chunk_plan: Option<ChunkPlan>,
    pub processing_mode: ProcessingMode,
    pub progress: Progress,
    pub result: Option<JobResult>,
    pub error: Option<JobError>,
    pub dedup_key: String,
    pub force: bool,
    pub approval_deadline: Option<DateTime<Utc>>,
    pub terminal_at: Option<DateTime<Utc>>,
    pub client_request_id: Option<String>,
    pub worker_id: Option<String>,
    pub retry_count: u32,
    /// The document name stamped onto every `Source` this job creates
    /// (spec.md §3 "Source" "document name"). Defaults to the submitted
    /// filename, falling back to the ontology name for inline text.
    pub document_name: String,
    pub input: JobInput,
}

impl Job {
    /// Invariant check used in tests and before persisting a transition.
    pub fn invariants_hold(&self) -> bool {
        let approval_ok =
            (self.state == JobState::AwaitingApproval) == self.approval_deadline.is_some();
        let result_ok = (self.state == JobState::Completed) == self.result.is_some();
        let error_ok = matches!(
            self.state,
            JobState::Failed | JobState::Cancelled | JobState::Expired
        ) == self.error.is_some();
        approval_ok && result_ok && error_ok
    }
}
