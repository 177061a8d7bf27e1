use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use stratum_models::{ErrorKind, JobError, JobState};
use stratum_store::{JobFilter, JobPatch, Pagination, RelationalStore, StoreResult};
use tracing::{info, warn};

use crate::cancel::CancellationRegistry;

/// Tunables for one `Scheduler` sweep (spec.md §4.J), mirroring
/// `AppConfig`'s scheduler fields so a caller can build this straight from
/// `AppConfig::from_env()`.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub sweep_interval: Duration,
    pub approval_ttl_secs: i64,
    pub stalled_job_timeout_secs: i64,
    pub job_retention: chrono::Duration,
    pub orphan_retry_budget: u32,
}

/// Per-sweep counters (spec.md §4.J step 5 "Emit scheduler statistics").
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepStats {
    pub expired: u64,
    pub reaped: u64,
    pub recovered: u64,
    pub pruned: u64,
}

/// The single background sweeper (spec.md §4.J). New — the platform has no
/// equivalent single loop, but its shape (a periodic `tokio::time::interval`
/// mutating shared state under CAS) follows the periodic-task conventions
/// already present in the workspace (`indexers::services::concur_control`'s
/// permit-gated work, `backend`'s rate limiter).
pub struct Scheduler {
    relational: Arc<dyn RelationalStore>,
    cancellation: Arc<CancellationRegistry>,
    worker_id: String,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(relational: Arc<dyn RelationalStore>, cancellation: Arc<CancellationRegistry>, worker_id: String, config: SchedulerConfig) -> Self {
        Self {
            relational,
            cancellation,
            worker_id,
            config,
        }
    }

    /// Run sweeps forever at `config.sweep_interval`.
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.sweep().await {
                Ok(stats) => info!(
                    expired = stats.expired,
                    reaped = stats.reaped,
                    recovered = stats.recovered,
                    pruned = stats.pruned,
                    "scheduler sweep complete"
                ),
                Err(err) => warn!(error = %err, "scheduler sweep failed"),
            }
            tokio::time::sleep(self.config.sweep_interval).await;
        }
    }

    /// One full sweep: expire stale approvals, reap stalled processing
    /// jobs, recover orphaned jobs left behind by a crashed instance, and
    /// prune old terminal jobs (spec.md §4.J steps 1-4).
    pub async fn sweep(&self) -> StoreResult<SweepStats> {
        let mut stats = SweepStats::default();
        stats.expired = self.expire_approvals().await?;
        stats.reaped = self.reap_stalled().await?;
        stats.recovered = self.recover_orphans().await?;
        stats.pruned = self.prune_terminal().await?;
        Ok(stats)
    }

    /// Step 1: `awaiting_approval` jobs whose deadline has passed move to
    /// `expired`.
    async fn expire_approvals(&self) -> StoreResult<u64> {
        let now = Utc::now();
        let candidates = self
            .relational
            .list_jobs(
                JobFilter {
                    state: Some(JobState::AwaitingApproval),
                    ..Default::default()
                },
                Pagination { limit: 256, offset: 0 },
            )
            .await?;

        let mut count = 0;
        for job in candidates {
            let Some(deadline) = job.approval_deadline else {
                continue;
            };
            if deadline >= now {
                continue;
            }
            let patch = JobPatch {
                error: Some(JobError::new(ErrorKind::Expired, "approval deadline passed")),
                terminal_at: Some(now),
                approval_deadline: Some(None),
                ..Default::default()
            };
            if self
                .relational
                .update_state_atomically(job.id, JobState::AwaitingApproval, JobState::Expired, patch)
                .await?
            {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Step 2: `processing` jobs whose last progress update is older than
    /// the stall threshold fail with cause="stalled"; if this instance owns
    /// the job, its cancellation flag is also raised.
    async fn reap_stalled(&self) -> StoreResult<u64> {
        let now = Utc::now();
        let threshold = now - chrono::Duration::seconds(self.config.stalled_job_timeout_secs);
        let candidates = self
            .relational
            .list_jobs(
                JobFilter {
                    state: Some(JobState::Processing),
                    ..Default::default()
                },
                Pagination { limit: 256, offset: 0 },
            )
            .await?;

        let mut count = 0;
        for job in candidates {
            let last_update = job.progress.last_update.unwrap_or(job.submitted_at);
            if last_update >= threshold {
                continue;
            }
            self.cancellation.cancel(job.id);
            let patch = JobPatch {
                error: Some(JobError::new(ErrorKind::Stalled, "no progress update within stall threshold")),
                terminal_at: Some(now),
                ..Default::default()
            };
            if self
                .relational
                .update_state_atomically(job.id, JobState::Processing, JobState::Failed, patch)
                .await?
            {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Step 3: on startup (and every sweep, which is harmless — a job
    /// genuinely owned by this instance has its `worker_id` set to
    /// `self.worker_id` and is skipped), `queued`/`processing` jobs whose
    /// `worker_id` names an instance that is not this one are either
    /// re-queued (`approved`, to be redispatched) or failed once the retry
    /// budget is exhausted.
    async fn recover_orphans(&self) -> StoreResult<u64> {
        let mut count = 0;
        for state in [JobState::Queued, JobState::Processing] {
            let candidates = self
                .relational
                .list_jobs(
                    JobFilter {
                        state: Some(state),
                        ..Default::default()
                    },
                    Pagination { limit: 256, offset: 0 },
                )
                .await?;

            for job in candidates {
                let owned_here = job.worker_id.as_deref() == Some(self.worker_id.as_str());
                if owned_here {
                    continue;
                }
                // An orphan from another (possibly crashed) instance.
                let recovered = if job.retry_count < self.config.orphan_retry_budget {
                    self.relational
                        .update_state_atomically(
                            job.id,
                            state,
                            JobState::Approved,
                            JobPatch {
                                worker_id: Some(None),
                                retry_count: Some(job.retry_count + 1),
                                ..Default::default()
                            },
                        )
                        .await?
                } else {
                    self.relational
                        .update_state_atomically(
                            job.id,
                            state,
                            JobState::Failed,
                            JobPatch {
                                error: Some(JobError::new(ErrorKind::Internal, "orphan retry budget exhausted")),
                                terminal_at: Some(Utc::now()),
                                ..Default::default()
                            },
                        )
                        .await?
                };
                if recovered {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    /// Step 4: delete terminal jobs past the retention window.
    async fn prune_terminal(&self) -> StoreResult<u64> {
        let older_than = Utc::now() - self.config.job_retention;
        self.relational
            .garbage_collect_jobs(
                older_than,
                &[JobState::Completed, JobState::Failed, JobState::Cancelled, JobState::Expired],
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use stratum_models::{ChunkPlan, ChunkingStrategy, CostEstimate, Job, JobKind, ProcessingMode, Progress};
    use stratum_store::{InMemoryGraphStore, InMemoryRelationalStore};
    use uuid::Uuid;

    fn base_job(state: JobState) -> Job {
        Job {
            id: Uuid::new_v4(),
            kind: JobKind::IngestText,
            owner: "alice".to_string(),
            ontology: "T".to_string(),
            submitted_at: Utc::now(),
            state,
            cost_estimate: Some(CostEstimate::default()),
            chunk_plan: Some(ChunkPlan {
                count: 1,
                target_words: 1000,
                overlap_words: 200,
                strategy: ChunkingStrategy::Paragraph,
            }),
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

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            sweep_interval: Duration::from_secs(60),
            approval_ttl_secs: 86_400,
            stalled_job_timeout_secs: 1800,
            job_retention: chrono::Duration::days(7),
            orphan_retry_budget: 1,
        }
    }

    #[tokio::test]
    async fn expires_past_deadline_approvals() {
        let graph: Arc<dyn stratum_store::GraphStore> = Arc::new(InMemoryGraphStore::new());
        let relational: Arc<dyn RelationalStore> = Arc::new(InMemoryRelationalStore::new(graph));

        let mut job = base_job(JobState::AwaitingApproval);
        job.approval_deadline = Some(Utc::now() - chrono::Duration::hours(1));
        relational.insert_job(job.clone()).await.unwrap();

        let scheduler = Scheduler::new(relational.clone(), Arc::new(CancellationRegistry::new()), "w1".to_string(), config());
        let stats = scheduler.sweep().await.unwrap();
        assert_eq!(stats.expired, 1);

        let updated = relational.load_job(job.id).await.unwrap().unwrap();
        assert_eq!(updated.state, JobState::Expired);
        assert!(updated.error.is_some());
        assert!(updated.approval_deadline.is_none());
        assert!(updated.invariants_hold());
    }

    #[tokio::test]
    async fn does_not_expire_approvals_within_deadline() {
        let graph: Arc<dyn stratum_store::GraphStore> = Arc::new(InMemoryGraphStore::new());
        let relational: Arc<dyn RelationalStore> = Arc::new(InMemoryRelationalStore::new(graph));

        let mut job = base_job(JobState::AwaitingApproval);
        job.approval_deadline = Some(Utc::now() + chrono::Duration::hours(1));
        relational.insert_job(job.clone()).await.unwrap();

        let scheduler = Scheduler::new(relational.clone(), Arc::new(CancellationRegistry::new()), "w1".to_string(), config());
        let stats = scheduler.sweep().await.unwrap();
        assert_eq!(stats.expired, 0);
    }

    #[tokio::test]
    async fn reaps_stalled_processing_jobs_and_raises_cancel_flag() {
        let graph: Arc<dyn stratum_store::GraphStore> = Arc::new(InMemoryGraphStore::new());
        let relational: Arc<dyn RelationalStore> = Arc::new(InMemoryRelationalStore::new(graph));

        let mut job = base_job(JobState::Processing);
        job.progress.last_update = Some(Utc::now() - chrono::Duration::hours(2));
        relational.insert_job(job.clone()).await.unwrap();

        let cancellation = Arc::new(CancellationRegistry::new());
        let token = cancellation.register(job.id);
        let scheduler = Scheduler::new(relational.clone(), cancellation, "w1".to_string(), config());
        let stats = scheduler.sweep().await.unwrap();
        assert_eq!(stats.reaped, 1);
        assert!(token.is_cancelled());

        let updated = relational.load_job(job.id).await.unwrap().unwrap();
        assert_eq!(updated.state, JobState::Failed);
        assert_eq!(updated.error.unwrap().kind, ErrorKind::Stalled);
    }

    #[tokio::test]
    async fn recovers_an_orphaned_processing_job_back_to_approved() {
        let graph: Arc<dyn stratum_store::GraphStore> = Arc::new(InMemoryGraphStore::new());
        let relational: Arc<dyn RelationalStore> = Arc::new(InMemoryRelationalStore::new(graph));

        let mut job = base_job(JobState::Processing);
        job.worker_id = Some("dead-instance".to_string());
        relational.insert_job(job.clone()).await.unwrap();

        let scheduler = Scheduler::new(relational.clone(), Arc::new(CancellationRegistry::new()), "w1".to_string(), config());
        let stats = scheduler.sweep().await.unwrap();
        assert_eq!(stats.recovered, 1);

        let updated = relational.load_job(job.id).await.unwrap().unwrap();
        assert_eq!(updated.state, JobState::Approved);
        assert_eq!(updated.retry_count, 1);
        assert!(updated.worker_id.is_none());
    }

    #[tokio::test]
    async fn fails_an_orphan_once_retry_budget_is_exhausted() {
        let graph: Arc<dyn stratum_store::GraphStore> = Arc::new(InMemoryGraphStore::new());
        let relational: Arc<dyn RelationalStore> = Arc::new(InMemoryRelationalStore::new(graph));

        let mut job = base_job(JobState::Processing);
        job.worker_id = Some("dead-instance".to_string());
        job.retry_count = 1;
        relational.insert_job(job.clone()).await.unwrap();

        let scheduler = Scheduler::new(relational.clone(), Arc::new(CancellationRegistry::new()), "w1".to_string(), config());
        scheduler.sweep().await.unwrap();

        let updated = relational.load_job(job.id).await.unwrap().unwrap();
        assert_eq!(updated.state, JobState::Failed);
    }

    #[tokio::test]
    async fn leaves_jobs_owned_by_this_instance_alone() {
        let graph: Arc<dyn stratum_store::GraphStore> = Arc::new(InMemoryGraphStore::new());
        let relational: Arc<dyn RelationalStore> = Arc::new(InMemoryRelationalStore::new(graph));

        let mut job = base_job(JobState::Processing);
        job.worker_id = Some("w1".to_string());
        job.progress.last_update = Some(Utc::now());
        relational.insert_job(job.clone()).await.unwrap();

        let scheduler = Scheduler::new(relational.clone(), Arc::new(CancellationRegistry::new()), "w1".to_string(), config());
        let stats = scheduler.sweep().await.unwrap();
        assert_eq!(stats.recovered, 0);
        assert_eq!(stats.reaped, 0);
    }

    #[tokio::test]
    async fn prunes_old_terminal_jobs() {
        let graph: Arc<dyn stratum_store::GraphStore> = Arc::new(InMemoryGraphStore::new());
        let relational: Arc<dyn RelationalStore> = Arc::new(InMemoryRelationalStore::new(graph));

        let mut job = base_job(JobState::Completed);
        job.terminal_at = Some(Utc::now() - chrono::Duration::days(30));
        job.result = Some(stratum_models::JobResult {
            stats: Default::default(),
            warnings: vec![],
            duplicate_of: None,
        });
        relational.insert_job(job.clone()).await.unwrap();

        let scheduler = Scheduler::new(relational.clone(), Arc::new(CancellationRegistry::new()), "w1".to_string(), config());
        let stats = scheduler.sweep().await.unwrap();
        assert_eq!(stats.pruned, 1);
        assert!(relational.load_job(job.id).await.unwrap().is_none());
    }
}
