//! Durable job lifecycle management (spec.md §4.H, §4.I, §4.J): submission,
//! CAS-driven dispatch across a per-kind worker pool, and a background
//! sweeper that expires, reaps, recovers, and prunes jobs. Grounded on three
//! independent "job record with state + progress + error" shapes already in
//! the platform — `chunker::models::JobHandle`,
//! `data::services::ingestion::SyncJobHandle`,
//! `backend::services::indexing_orchestrator::IndexingJob` — unified here
//! into one durable `Job` type whose transitions all go through
//! `RelationalStore::update_state_atomically`'s compare-and-swap.

pub mod cancel;
pub mod handler;
pub mod pool;
pub mod scheduler;
pub mod submission;

pub use cancel::{CancellationRegistry, CancellationToken};
pub use handler::{JobHandler, NullProgressSink, ProgressSink, WorkerContext};
pub use pool::WorkerPool;
pub use scheduler::{Scheduler, SchedulerConfig, SweepStats};
pub use submission::{submit, SubmissionOutcome, SubmissionRequest};
