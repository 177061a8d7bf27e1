use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::stream::{self, Stream, StreamExt};
use parking_lot::Mutex;
use stratum_jobs::handler::ProgressSink;
use stratum_models::{JobDone, Progress, ProgressEvent, StreamEvent};
use stratum_store::{RelationalStore, StoreResult};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

/// Channel capacity per job — generous enough that a slow subscriber does
/// not make a fast worker block (spec.md §5 "broker back-pressure (if
/// any)" is explicitly not a suspension point this broker introduces).
const CHANNEL_CAPACITY: usize = 256;

/// How often a job's accumulated `Progress` is written back to the Job
/// Store (spec.md §4.K "rate-limited, e.g. ≤ 1 Hz").
const SNAPSHOT_MIN_INTERVAL: Duration = Duration::from_secs(1);

pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

struct JobChannel {
    sender: broadcast::Sender<StreamEvent>,
    /// Running snapshot folded from every `ProgressEvent` seen so far —
    /// what `save_progress_snapshot` persists (spec.md §4.K). Workers only
    /// emit deltas; the broker is what turns them into cumulative state,
    /// the same "fold events into a running total" shape as
    /// `stratum_models::Progress::bump`, used here instead of at the
    /// worker so every worker thread doesn't need its own copy.
    snapshot: Mutex<Progress>,
    last_persisted: Mutex<Option<Instant>>,
}

impl JobChannel {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            snapshot: Mutex::new(Progress::default()),
            last_persisted: Mutex::new(None),
        }
    }
}

/// Collects `ProgressEvent`s from workers and multiplexes them to any live
/// SSE/poll subscribers for that job, persisting a rate-limited snapshot to
/// the Job Store along the way (spec.md §4.K). Grounded on the platform's
/// `async-graphql` subscription shape
/// (`data::src::graphql::subscriptions::SubscriptionRoot` — one broadcast
/// channel multiplexed to many readers), generalized here from a
/// placeholder interval stream to a real per-job event fanout backed by
/// `tokio::sync::broadcast`.
pub struct ProgressBroker {
    relational: Arc<dyn RelationalStore>,
    channels: DashMap<Uuid, Arc<JobChannel>>,
}

impl ProgressBroker {
    pub fn new(relational: Arc<dyn RelationalStore>) -> Self {
        Self {
            relational,
            channels: DashMap::new(),
        }
    }

    fn channel_for(&self, job_id: Uuid) -> Arc<JobChannel> {
        self.channels
            .entry(job_id)
            .or_insert_with(|| Arc::new(JobChannel::new()))
            .clone()
    }

    /// Subscribe to `job_id`'s event stream (spec.md §4.K, §6 "Stream
    /// (SSE)"). A subscriber that connects after the job has already
    /// reached a terminal state (no live channel, and the store confirms
    /// terminal) gets a single `Done` event and then the stream ends
    /// (spec.md §4.K "Subscribers that connect after a job has reached a
    /// terminal state"). Any other subscriber — including one that
    /// connects before the job is even dispatched — gets a live channel so
    /// it observes every subsequent event in emission order (spec.md §5
    /// "Ordering guarantee").
    pub async fn subscribe(&self, job_id: Uuid) -> StoreResult<EventStream> {
        if !self.channels.contains_key(&job_id) {
            if let Some(job) = self.relational.load_job(job_id).await? {
                if job.state.is_terminal() {
                    let done = JobDone {
                        job_id,
                        state: job.state,
                        result: job.result,
                        error: job.error,
                    };
                    return Ok(Box::pin(stream::once(async move { StreamEvent::Done(done) })));
                }
            }
        }

        let channel = self.channel_for(job_id);
        let receiver = channel.sender.subscribe();
        let events = BroadcastStream::new(receiver).filter_map(|item| async move { item.ok() });
        Ok(Box::pin(events))
    }

    fn fold_and_maybe_persist(&self, channel: &Arc<JobChannel>, job_id: Uuid, event: &ProgressEvent) {
        let snapshot = {
            let mut snapshot = channel.snapshot.lock();
            snapshot.stage = event.stage.clone();
            snapshot.items_done = event.items_done;
            snapshot.items_total = event.items_total;
            for (counter, delta) in &event.counters_delta {
                snapshot.bump(counter, *delta);
            }
            snapshot.last_update = Some(event.timestamp);
            snapshot.clone()
        };

        let should_persist = {
            let mut last = channel.last_persisted.lock();
            let due = last.map(|t| t.elapsed() >= SNAPSHOT_MIN_INTERVAL).unwrap_or(true);
            if due {
                *last = Some(Instant::now());
            }
            due
        };
        if !should_persist {
            return;
        }

        let relational = self.relational.clone();
        tokio::spawn(async move {
            if let Err(err) = relational.save_progress_snapshot(job_id, snapshot).await {
                tracing::warn!(job_id = %job_id, error = %err, "failed to persist progress snapshot");
            }
        });
    }
}

impl ProgressSink for ProgressBroker {
    fn emit(&self, event: ProgressEvent) {
        let channel = self.channel_for(event.job_id);
        self.fold_and_maybe_persist(&channel, event.job_id, &event);
        // No receivers is not an error — polling-only callers never subscribe.
        let _ = channel.sender.send(StreamEvent::Progress(event));
    }

    fn emit_done(&self, done: JobDone) {
        let job_id = done.job_id;
        if let Some((_, channel)) = self.channels.remove(&job_id) {
            let _ = channel.sender.send(StreamEvent::Done(done));
            // Dropping `channel` here drops its `broadcast::Sender`, which
            // closes the stream for every live subscriber exactly once
            // they've drained the `Done` event already queued above
            // (spec.md §4.K "closes the subscription channel").
        } else {
            // No one ever subscribed or emitted progress for this job —
            // still fine, `subscribe` falls back to the store snapshot.
            tracing::debug!(job_id = %job_id, "job_done with no live channel");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;
    use stratum_models::{EventLevel, ErrorKind, IngestionStats, JobError, JobResult, JobState};
    use stratum_store::{InMemoryGraphStore, InMemoryRelationalStore};

    fn relational() -> Arc<dyn RelationalStore> {
        let graph: Arc<dyn stratum_store::GraphStore> = Arc::new(InMemoryGraphStore::new());
        Arc::new(InMemoryRelationalStore::new(graph))
    }

    fn progress_event(job_id: Uuid, items_done: usize) -> ProgressEvent {
        let mut counters = HashMap::new();
        counters.insert("concepts_created".to_string(), 1);
        ProgressEvent {
            job_id,
            stage: "ingest".to_string(),
            items_done,
            items_total: 10,
            message: None,
            timestamp: Utc::now(),
            counters_delta: counters,
            level: EventLevel::Info,
        }
    }

    #[tokio::test]
    async fn a_live_subscriber_sees_progress_then_done_in_order() {
        let relational = relational();
        let broker = ProgressBroker::new(relational);
        let job_id = Uuid::new_v4();

        let mut stream = broker.subscribe(job_id).await.unwrap();
        broker.emit(progress_event(job_id, 1));
        broker.emit_done(JobDone {
            job_id,
            state: JobState::Completed,
            result: Some(JobResult {
                stats: IngestionStats::default(),
                warnings: vec![],
                duplicate_of: None,
            }),
            error: None,
        });

        let first = stream.next().await.unwrap();
        assert!(matches!(first, StreamEvent::Progress(_)));
        let second = stream.next().await.unwrap();
        assert!(matches!(second, StreamEvent::Done(_)));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn late_subscriber_to_a_terminal_job_gets_a_single_done_event() {
        let relational = relational();
        let job_id = Uuid::new_v4();
        let mut job = sample_job(job_id);
        job.state = JobState::Failed;
        job.error = Some(JobError::new(ErrorKind::Internal, "boom"));
        job.terminal_at = Some(Utc::now());
        relational.insert_job(job).await.unwrap();

        let broker = ProgressBroker::new(relational);
        let mut stream = broker.subscribe(job_id).await.unwrap();
        let event = stream.next().await.unwrap();
        assert!(matches!(event, StreamEvent::Done(_)));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn events_fold_into_a_cumulative_snapshot() {
        let relational = relational();
        let broker = ProgressBroker::new(relational);
        let job_id = Uuid::new_v4();

        let _stream = broker.subscribe(job_id).await.unwrap();
        broker.emit(progress_event(job_id, 1));
        broker.emit(progress_event(job_id, 2));

        let channel = broker.channel_for(job_id);
        let snapshot = channel.snapshot.lock().clone();
        assert_eq!(snapshot.items_done, 2);
        assert_eq!(snapshot.counters.get("concepts_created"), Some(&2));
    }

    fn sample_job(id: Uuid) -> stratum_models::Job {
        stratum_models::Job {
            id,
            kind: stratum_models::JobKind::IngestText,
            owner: "alice".to_string(),
            ontology: "T".to_string(),
            submitted_at: Utc::now(),
            state: JobState::Processing,
            cost_estimate: None,
            chunk_plan: None,
            processing_mode: stratum_models::ProcessingMode::Serial,
            progress: Progress::default(),
            result: None,
            error: None,
            dedup_key: format!("dedup-{id}"),
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
}
