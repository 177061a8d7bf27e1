use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use stratum_models::{ErrorKind, Job, JobDone, JobError, JobKind, JobState};
use stratum_store::{JobFilter, JobPatch, Pagination, RelationalStore, StoreResult};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::cancel::CancellationRegistry;
use crate::handler::{JobHandler, ProgressSink, WorkerContext};

/// A fixed-size pool of workers keyed by job kind (spec.md §4.I). Each kind
/// gets its own `tokio::sync::Semaphore` so one busy kind never starves the
/// others — the same "acquire a permit before doing the work" shape as the
/// platform's `ConcurrencyController` (`indexers::services::concur_control`),
/// generalized from one global semaphore to one per job kind.
pub struct WorkerPool {
    relational: Arc<dyn RelationalStore>,
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
    semaphores: HashMap<JobKind, Arc<Semaphore>>,
    cancellation: Arc<CancellationRegistry>,
    progress: Arc<dyn ProgressSink>,
    worker_id: String,
    poll_interval: Duration,
}

impl WorkerPool {
    pub fn new(
        relational: Arc<dyn RelationalStore>,
        handlers: Vec<Arc<dyn JobHandler>>,
        cancellation: Arc<CancellationRegistry>,
        progress: Arc<dyn ProgressSink>,
        worker_id: String,
        permits_per_kind: usize,
        poll_interval: Duration,
    ) -> Self {
        let mut handler_map = HashMap::new();
        let mut semaphores = HashMap::new();
        for handler in handlers {
            let kind = handler.kind();
            semaphores.insert(kind, Arc::new(Semaphore::new(permits_per_kind)));
            handler_map.insert(kind, handler);
        }
        Self {
            relational,
            handlers: handler_map,
            semaphores,
            cancellation,
            progress,
            worker_id,
            poll_interval,
        }
    }

    /// Run the dispatch loop forever. Intended to be `tokio::spawn`ed
    /// alongside the `Scheduler` (spec.md §5 "the Scheduler and Broker are
    /// independent background tasks").
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.dispatch_one().await {
                Ok(true) => continue,
                Ok(false) => tokio::time::sleep(self.poll_interval).await,
                Err(err) => {
                    error!(error = %err, "worker pool dispatch failed, backing off");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// One iteration of the dispatch algorithm (spec.md §4.I):
    /// find an `approved` job whose kind has a free permit, CAS it to
    /// `queued` then `processing`, and spawn its worker. Returns `Ok(true)`
    /// if a job was dispatched, `Ok(false)` if nothing was eligible.
    pub async fn dispatch_one(&self) -> StoreResult<bool> {
        let candidates = self
            .relational
            .list_jobs(
                JobFilter {
                    state: Some(JobState::Approved),
                    ..Default::default()
                },
                Pagination { limit: 32, offset: 0 },
            )
            .await?;

        for job in candidates {
            let Some(semaphore) = self.semaphores.get(&job.kind) else {
                // No handler registered for this kind — leave it approved,
                // a misconfiguration rather than a reason to fail the loop.
                continue;
            };
            let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                continue;
            };

            let won = self
                .relational
                .update_state_atomically(
                    job.id,
                    JobState::Approved,
                    JobState::Queued,
                    JobPatch {
                        worker_id: Some(Some(self.worker_id.clone())),
                        ..Default::default()
                    },
                )
                .await?;
            if !won {
                // Another dispatcher won the race; release the permit and
                // try the next candidate.
                drop(permit);
                continue;
            }

            let moved = self
                .relational
                .update_state_atomically(job.id, JobState::Queued, JobState::Processing, Default::default())
                .await?;
            if !moved {
                // Cancelled between queued and processing by another actor.
                drop(permit);
                continue;
            }

            let handler = self.handlers[&job.kind].clone();
            let relational = self.relational.clone();
            let cancellation = self.cancellation.clone();
            let progress = self.progress.clone();
            let token = cancellation.register(job.id);
            let job_id = job.id;

            tokio::spawn(async move {
                let _permit = permit;
                let ctx = WorkerContext {
                    job_id,
                    cancel: token,
                    progress: progress.clone(),
                };
                let outcome = handler.run(job, ctx).await;
                cancellation.clear(job_id);

                let (to, patch) = match outcome {
                    Ok(result) => (
                        JobState::Completed,
                        JobPatch {
                            result: Some(result.clone()),
                            terminal_at: Some(Utc::now()),
                            ..Default::default()
                        },
                    ),
                    Err(err) => {
                        let to = match err.kind {
                            ErrorKind::Cancelled => JobState::Cancelled,
                            _ => JobState::Failed,
                        };
                        (
                            to,
                            JobPatch {
                                error: Some(err.clone()),
                                terminal_at: Some(Utc::now()),
                                ..Default::default()
                            },
                        )
                    }
                };

                match relational.update_state_atomically(job_id, JobState::Processing, to, patch.clone()).await {
                    Ok(true) => {}
                    Ok(false) => warn!(job_id = %job_id, "lost CAS race finalizing job, another actor already moved it"),
                    Err(e) => error!(job_id = %job_id, error = %e, "failed to persist terminal job state"),
                }

                if let Some(job) = relational.load_job(job_id).await.ok().flatten() {
                    progress.emit_done(JobDone {
                        job_id,
                        state: job.state,
                        result: job.result,
                        error: job.error,
                    });
                } else {
                    progress.emit_done(JobDone {
                        job_id,
                        state: to,
                        result: None,
                        error: Some(JobError::new(ErrorKind::Internal, "job vanished after dispatch")),
                    });
                }

                info!(job_id = %job_id, state = ?to, "job reached terminal state");
            });

            return Ok(true);
        }

        Ok(false)
    }

    /// Request cancellation of a running job on this instance (spec.md §5
    /// "Cancellation"). No-op (returns `false`) if the job is not currently
    /// dispatched here.
    pub fn request_cancel(&self, job_id: uuid::Uuid) -> bool {
        self.cancellation.cancel(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::NullProgressSink;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use stratum_models::{IngestionStats, JobResult, ProcessingMode, Progress};
    use stratum_store::{InMemoryGraphStore, InMemoryRelationalStore};
    use uuid::Uuid;

    struct CountingHandler {
        kind: JobKind,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        fn kind(&self) -> JobKind {
            self.kind
        }

        async fn run(&self, _job: Job, _ctx: WorkerContext) -> Result<JobResult, JobError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(JobResult {
                stats: IngestionStats::default(),
                warnings: vec![],
                duplicate_of: None,
            })
        }
    }

    fn approved_job(kind: JobKind) -> Job {
        Job {
            id: Uuid::new_v4(),
            kind,
            owner: "alice".to_string(),
            ontology: "T".to_string(),
            submitted_at: Utc::now(),
            state: JobState::Approved,
            cost_estimate: None,
            chunk_plan: None,
            processing_mode: ProcessingMode::Serial,
            progress: Progress::default(),
            result: None,
            error: None,
            dedup_key: format!("dedup-{}", Uuid::new_v4()),
            force: false,
            approval_deadline: None,
            terminal_at: None,
            client_request_id: None,
            worker_id: None,
            retry_count: 0,
            document_name: "T".to_string(),
            input: stratum_models::JobInput::Inline("text".to_string()),
        }
    }

    #[tokio::test]
    async fn dispatches_an_approved_job_and_runs_it_to_completion() {
        let graph: Arc<dyn stratum_store::GraphStore> = Arc::new(InMemoryGraphStore::new());
        let relational: Arc<dyn RelationalStore> = Arc::new(InMemoryRelationalStore::new(graph));
        let job = approved_job(JobKind::IngestText);
        relational.insert_job(job.clone()).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let handler: Arc<dyn JobHandler> = Arc::new(CountingHandler {
            kind: JobKind::IngestText,
            calls: calls.clone(),
        });

        let pool = Arc::new(WorkerPool::new(
            relational.clone(),
            vec![handler],
            Arc::new(CancellationRegistry::new()),
            Arc::new(NullProgressSink),
            "worker-1".to_string(),
            2,
            Duration::from_millis(10),
        ));

        assert!(pool.dispatch_one().await.unwrap());
        // Give the spawned task a chance to run and persist its terminal state.
        for _ in 0..50 {
            if let Some(updated) = relational.load_job(job.id).await.unwrap() {
                if updated.state.is_terminal() {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let updated = relational.load_job(job.id).await.unwrap().unwrap();
        assert_eq!(updated.state, JobState::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_eligible_job_returns_false() {
        let graph: Arc<dyn stratum_store::GraphStore> = Arc::new(InMemoryGraphStore::new());
        let relational: Arc<dyn RelationalStore> = Arc::new(InMemoryRelationalStore::new(graph));
        let pool = Arc::new(WorkerPool::new(
            relational,
            vec![],
            Arc::new(CancellationRegistry::new()),
            Arc::new(NullProgressSink),
            "worker-1".to_string(),
            2,
            Duration::from_millis(10),
        ));
        assert!(!pool.dispatch_one().await.unwrap());
    }

    #[tokio::test]
    async fn unregistered_kind_is_left_approved() {
        let graph: Arc<dyn stratum_store::GraphStore> = Arc::new(InMemoryGraphStore::new());
        let relational: Arc<dyn RelationalStore> = Arc::new(InMemoryRelationalStore::new(graph));
        let job = approved_job(JobKind::Analysis);
        relational.insert_job(job.clone()).await.unwrap();

        let pool = Arc::new(WorkerPool::new(
            relational.clone(),
            vec![],
            Arc::new(CancellationRegistry::new()),
            Arc::new(NullProgressSink),
            "worker-1".to_string(),
            2,
            Duration::from_millis(10),
        ));
        assert!(!pool.dispatch_one().await.unwrap());
        let unchanged = relational.load_job(job.id).await.unwrap().unwrap();
        assert_eq!(unchanged.state, JobState::Approved);
    }
}
