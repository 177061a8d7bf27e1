use std::sync::Arc;

use async_trait::async_trait;
use stratum_jobs::handler::{JobHandler, WorkerContext};
use stratum_models::{ErrorKind, IngestionStats, Job, JobError, JobInput, JobKind, JobResult};
use stratum_store::ObjectStore;

use crate::engine::{DocumentOutcome, UpsertEngine};
use crate::error::UpsertError;

/// `JobHandler` for the ingestion job kinds (spec.md §4.E, §4.I). Resolves
/// `job.input` to the document's full text, then hands the rest of the work
/// to `UpsertEngine::process_document`. Grounded on
/// `graph_rag::services::chunk_processor::ChunkProcessor::process_document`,
/// which does the same resolve-then-dispatch shape against its own job
/// queue.
pub struct IngestionHandler {
    engine: Arc<UpsertEngine>,
    objects: Arc<dyn ObjectStore>,
}

impl IngestionHandler {
    pub fn new(engine: Arc<UpsertEngine>, objects: Arc<dyn ObjectStore>) -> Self {
        Self { engine, objects }
    }

    async fn resolve_text(&self, input: &JobInput) -> Result<String, JobError> {
        match input {
            JobInput::Inline(text) => Ok(text.clone()),
            JobInput::ObjectStoreKey(key) => {
                let bytes = self
                    .objects
                    .get(key)
                    .await
                    .map_err(|e| JobError::new(ErrorKind::Internal, format!("object store read failed: {e}")))?
                    .ok_or_else(|| JobError::new(ErrorKind::Internal, format!("object store key {key} not found")))?;
                String::from_utf8(bytes)
                    .map_err(|e| JobError::new(ErrorKind::Validation, format!("stored document is not valid utf-8: {e}")))
            }
        }
    }
}

#[async_trait]
impl JobHandler for IngestionHandler {
    fn kind(&self) -> JobKind {
        JobKind::IngestText
    }

    async fn run(&self, job: Job, ctx: WorkerContext) -> Result<JobResult, JobError> {
        let full_text = self.resolve_text(&job.input).await?;
        let plan = job.chunk_plan.clone().unwrap_or_default();

        let outcome = self
            .engine
            .process_document(
                &job.ontology,
                &job.document_name,
                &full_text,
                plan.target_words,
                plan.overlap_words,
                job.processing_mode,
                &ctx,
            )
            .await;

        match outcome {
            DocumentOutcome::Completed { stats, warnings } => Ok(JobResult {
                stats,
                warnings,
                duplicate_of: None,
            }),
            DocumentOutcome::Cancelled { stats, warnings } => {
                Err(terminal_error(ErrorKind::Cancelled, "ingestion cancelled", stats, warnings, None))
            }
            DocumentOutcome::Failed {
                stats,
                mut warnings,
                chunk_index,
                error,
            } => {
                let kind = match &error {
                    UpsertError::Cancelled => ErrorKind::Cancelled,
                    UpsertError::Provider(p) if p.is_retryable() => ErrorKind::ProviderUnavailable,
                    UpsertError::Provider(_) => ErrorKind::ProviderInvalidRequest,
                    UpsertError::Store(_) => ErrorKind::Internal,
                };
                if let Some(index) = chunk_index {
                    warnings.push(format!("failed at chunk {index}"));
                }
                Err(terminal_error(kind, error.to_string(), stats, warnings, chunk_index))
            }
        }
    }
}

/// A second ingestion kind (`IngestFile`) is dispatched through the same
/// handler logic; since `WorkerPool` keys handlers by a single `JobKind`,
/// register one `IngestionHandler` instance per kind it should answer to.
pub struct IngestFileHandler(pub IngestionHandler);

#[async_trait]
impl JobHandler for IngestFileHandler {
    fn kind(&self) -> JobKind {
        JobKind::IngestFile
    }

    async fn run(&self, job: Job, ctx: WorkerContext) -> Result<JobResult, JobError> {
        self.0.run(job, ctx).await
    }
}

fn terminal_error(
    kind: ErrorKind,
    message: impl Into<String>,
    stats: IngestionStats,
    warnings: Vec<String>,
    chunk_index: Option<usize>,
) -> JobError {
    let mut error = JobError::new(kind, message);
    error.detail = Some(serde_json::json!({
        "stats": stats,
        "warnings": warnings,
        "chunk_index": chunk_index,
    }));
    error
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use stratum_config::thresholds::MatchThresholds;
    use stratum_config::vocabulary::RelationshipAllowlist;
    use stratum_jobs::{CancellationRegistry, NullProgressSink};
    use stratum_models::{ChunkPlan, JobState, ProcessingMode, Progress};
    use stratum_provider::mock::{MockMode, MockProvider};
    use stratum_store::{InMemoryGraphStore, InMemoryObjectStore};
    use uuid::Uuid;

    fn base_job(input: JobInput) -> Job {
        Job {
            id: Uuid::new_v4(),
            kind: JobKind::IngestText,
            owner: "alice".to_string(),
            ontology: "T".to_string(),
            submitted_at: chrono::Utc::now(),
            state: JobState::Processing,
            cost_estimate: None,
            chunk_plan: Some(ChunkPlan {
                count: 1,
                target_words: 50,
                overlap_words: 0,
                ..Default::default()
            }),
            processing_mode: ProcessingMode::Serial,
            progress: Progress::default(),
            result: None,
            error: None,
            dedup_key: "dedup".to_string(),
            force: false,
            approval_deadline: None,
            terminal_at: None,
            client_request_id: None,
            worker_id: None,
            retry_count: 0,
            document_name: "doc".to_string(),
            input,
        }
    }

    #[tokio::test]
    async fn runs_an_inline_ingestion_job_to_completion() {
        let graph = Arc::new(InMemoryGraphStore::new());
        let provider = Arc::new(MockProvider::new(8, MockMode::Simple));
        let engine = Arc::new(UpsertEngine::new(
            graph.clone(),
            provider.clone(),
            provider,
            MatchThresholds::default(),
            RelationshipAllowlist::default(),
            3,
        ));
        let objects: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
        let handler = IngestionHandler::new(engine, objects);

        let job = base_job(JobInput::Inline("Sentence one. Sentence two.".to_string()));
        let ctx = WorkerContext {
            job_id: job.id,
            cancel: CancellationRegistry::new().register(job.id),
            progress: Arc::new(NullProgressSink),
        };

        let result = handler.run(job, ctx).await.unwrap();
        assert!(result.stats.chunks_done >= 1);
    }

    #[tokio::test]
    async fn missing_object_store_key_fails_validation() {
        let graph = Arc::new(InMemoryGraphStore::new());
        let provider = Arc::new(MockProvider::new(8, MockMode::Simple));
        let engine = Arc::new(UpsertEngine::new(
            graph,
            provider.clone(),
            provider,
            MatchThresholds::default(),
            RelationshipAllowlist::default(),
            3,
        ));
        let objects: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
        let handler = IngestionHandler::new(engine, objects);

        let job = base_job(JobInput::ObjectStoreKey("sources/T/missing.txt".to_string()));
        let ctx = WorkerContext {
            job_id: job.id,
            cancel: CancellationRegistry::new().register(job.id),
            progress: Arc::new(NullProgressSink),
        };

        let err = handler.run(job, ctx).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
    }
}
