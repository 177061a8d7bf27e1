use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use stratum_jobs::handler::{JobHandler, WorkerContext};
use stratum_models::{ErrorKind, EventLevel, IngestionStats, Job, JobError, JobInput, JobKind, JobResult};
use stratum_store::RegenSelector;
use uuid::Uuid;

use crate::regen::RegenerationWorker;

/// `JobHandler` for `JobKind::RegenerateEmbeddings` (spec.md §4.F
/// "Regeneration"). The selector travels in `job.input` as a small JSON
/// envelope rather than a new `Job` field, the same "stash a typed payload
/// in the existing input slot" trick `chunker::handlers::jobs` uses to pass
/// per-job parameters through a generic job record.
pub struct RegenerationHandler {
    worker: Arc<RegenerationWorker>,
}

impl RegenerationHandler {
    pub fn new(worker: Arc<RegenerationWorker>) -> Self {
        Self { worker }
    }

    fn parse_selector(input: &JobInput) -> Result<RegenSelector, JobError> {
        let JobInput::Inline(raw) = input else {
            return Err(JobError::new(ErrorKind::Validation, "regeneration jobs require an inline selector payload"));
        };
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| JobError::new(ErrorKind::Validation, format!("malformed regeneration selector: {e}")))?;

        match value.get("selector").and_then(|v| v.as_str()) {
            Some("all") => Ok(RegenSelector::All),
            Some("ontology") => {
                let ontology = value
                    .get("ontology")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| JobError::new(ErrorKind::Validation, "ontology selector missing \"ontology\" field"))?;
                Ok(RegenSelector::Ontology(ontology.to_string()))
            }
            Some("source") => {
                let source_id = value
                    .get("source_id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| JobError::new(ErrorKind::Validation, "source selector missing \"source_id\" field"))?;
                let id = Uuid::parse_str(source_id)
                    .map_err(|e| JobError::new(ErrorKind::Validation, format!("invalid source_id: {e}")))?;
                Ok(RegenSelector::Source(id))
            }
            _ => Err(JobError::new(ErrorKind::Validation, "selector must be one of: all, ontology, source")),
        }
    }
}

#[async_trait]
impl JobHandler for RegenerationHandler {
    fn kind(&self) -> JobKind {
        JobKind::RegenerateEmbeddings
    }

    async fn run(&self, job: Job, ctx: WorkerContext) -> Result<JobResult, JobError> {
        let selector = Self::parse_selector(&job.input)?;

        let mut stats = IngestionStats::default();
        let mut warnings = Vec::new();
        let outcomes = self
            .worker
            .run(selector, |outcome| {
                stats.chunks_done += outcome.rows_written;
                let mut counters = HashMap::new();
                counters.insert("sources_regenerated".to_string(), 1);
                counters.insert("embeddings_written".to_string(), outcome.rows_written as u64);
                ctx.emit(
                    "regenerate",
                    stats.chunks_done,
                    stats.chunks_done,
                    Some(format!("source {} regenerated ({} rows)", outcome.source_id, outcome.rows_written)),
                    counters,
                    EventLevel::Info,
                );
                !ctx.is_cancelled()
            })
            .await
            .map_err(|e| JobError::new(ErrorKind::Internal, format!("regeneration sweep failed: {e}")))?;

        stats.chunks_total = outcomes.len();
        if ctx.is_cancelled() {
            warnings.push("regeneration cancelled mid-sweep".to_string());
            let mut error = JobError::new(ErrorKind::Cancelled, "regeneration cancelled");
            error.detail = Some(serde_json::json!({ "stats": stats, "warnings": warnings }));
            return Err(error);
        }

        Ok(JobResult {
            stats,
            warnings,
            duplicate_of: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;
    use stratum_jobs::{CancellationRegistry, NullProgressSink};
    use stratum_models::{ChunkPlan, JobState, ProcessingMode, Progress, Source};
    use stratum_provider::mock::MockProvider;
    use stratum_store::{GraphStore, InMemoryGraphStore, InMemoryRelationalStore, RelationalStore};

    fn base_job(input: JobInput) -> Job {
        Job {
            id: Uuid::new_v4(),
            kind: JobKind::RegenerateEmbeddings,
            owner: "system".to_string(),
            ontology: "T".to_string(),
            submitted_at: Utc::now(),
            state: JobState::Processing,
            cost_estimate: None,
            chunk_plan: Some(ChunkPlan::default()),
            processing_mode: ProcessingMode::Serial,
            progress: Progress::default(),
            result: None,
            error: None,
            dedup_key: "dedup".to_string(),
            force: true,
            approval_deadline: None,
            terminal_at: None,
            client_request_id: None,
            worker_id: None,
            retry_count: 0,
            document_name: "T".to_string(),
            input,
        }
    }

    fn ctx(job_id: Uuid) -> WorkerContext {
        WorkerContext {
            job_id,
            cancel: CancellationRegistry::new().register(job_id),
            progress: Arc::new(NullProgressSink),
        }
    }

    #[tokio::test]
    async fn regenerates_every_stale_source_in_an_ontology() {
        let graph: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
        let relational: Arc<dyn RelationalStore> = Arc::new(InMemoryRelationalStore::new(graph.clone()));
        let embedder = Arc::new(MockProvider::default());

        let src = Source {
            id: Uuid::new_v4(),
            ontology: "T".to_string(),
            document_name: "doc".to_string(),
            paragraph_index: 0,
            full_text: "A sentence to embed. Another one too.".to_string(),
            content_hash: None,
            object_store_pointer: None,
            created_at: Utc::now(),
        };
        graph.create_source(src.clone()).await.unwrap();

        let worker = Arc::new(RegenerationWorker::new(graph, relational, embedder, 500));
        let handler = RegenerationHandler::new(worker);

        let job = base_job(JobInput::Inline(serde_json::json!({"selector": "ontology", "ontology": "T"}).to_string()));
        let result = handler.run(job.clone(), ctx(job.id)).await.unwrap();
        assert_eq!(result.stats.chunks_total, 1);
        assert!(result.stats.chunks_done >= 1);
    }

    #[tokio::test]
    async fn rejects_a_malformed_selector() {
        let graph: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
        let relational: Arc<dyn RelationalStore> = Arc::new(InMemoryRelationalStore::new(graph.clone()));
        let embedder = Arc::new(MockProvider::default());
        let worker = Arc::new(RegenerationWorker::new(graph, relational, embedder, 500));
        let handler = RegenerationHandler::new(worker);

        let job = base_job(JobInput::Inline("not json".to_string()));
        let err = handler.run(job.clone(), ctx(job.id)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }
}
