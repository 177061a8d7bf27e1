use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use stratum_models::{EventLevel, Job, JobDone, JobError, JobKind, JobResult, ProgressEvent};
use uuid::Uuid;

use crate::cancel::CancellationToken;

/// Where a worker's `ProgressEvent`s and terminal `JobDone` go (spec.md
/// §4.K). Implemented by `stratum-broker`; kept as a trait here so `jobs`
/// does not depend on the broker crate.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
    fn emit_done(&self, done: JobDone);
}

/// A `ProgressSink` that drops every event — used by tests and by any
/// caller that only cares about the final `Job` row.
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn emit(&self, _event: ProgressEvent) {}
    fn emit_done(&self, _done: JobDone) {}
}

/// Everything a running worker needs besides the `Job` itself: how to check
/// for cancellation and how to report progress (spec.md §4.I, §4.K).
#[derive(Clone)]
pub struct WorkerContext {
    pub job_id: Uuid,
    pub cancel: CancellationToken,
    pub progress: Arc<dyn ProgressSink>,
}

impl WorkerContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn emit(&self, stage: &str, items_done: usize, items_total: usize, message: Option<String>, counters_delta: HashMap<String, u64>, level: EventLevel) {
        self.progress.emit(ProgressEvent {
            job_id: self.job_id,
            stage: stage.to_string(),
            items_done,
            items_total,
            message,
            timestamp: Utc::now(),
            counters_delta,
            level,
        });
    }
}

/// The worker logic for one `JobKind` (spec.md §4.I "spawn cancellable task
/// running the worker for job.kind"). Registered with the `WorkerPool` by
/// kind; concrete implementations live in `stratum-upsert` (ingestion
/// kinds) and `stratum-source-embed` (`RegenerateEmbeddings`).
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn kind(&self) -> JobKind;
    async fn run(&self, job: Job, ctx: WorkerContext) -> Result<JobResult, JobError>;
}
