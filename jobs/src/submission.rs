use chrono::{Duration, Utc};
use stratum_chunker::chunk_ingestion;
use stratum_models::{ChunkPlan, ChunkingStrategy, CostEstimate, Job, JobInput, JobKind, JobState, ProcessingMode, Progress};
use stratum_store::{RelationalStore, StoreResult};
use uuid::Uuid;

/// The fields the submission contract (spec.md §6) accepts. `ontology` is
/// required except in directory-as-ontology mode, which is an upstream
/// (CLI/API) concern — by the time a `SubmissionRequest` reaches this crate
/// the ontology name has already been resolved.
#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    pub owner: String,
    pub ontology: String,
    pub kind: JobKind,
    pub text: String,
    pub filename: Option<String>,
    pub target_words: usize,
    pub overlap_words: usize,
    pub processing_mode: ProcessingMode,
    pub force: bool,
    pub auto_approve: bool,
    pub client_request_id: Option<String>,
}

#[derive(Debug, Clone)]
pub enum SubmissionOutcome {
    /// A new job row was inserted.
    Created(Job),
    /// A dedup-key hit on a terminal job and `force == false`: the
    /// existing job is returned unprocessed (spec.md §4.E "Duplicate
    /// detection", §7 "not an error in the job state sense").
    Duplicate(Job),
}

/// Cheap pre-LLM cost heuristic (spec.md §6 "word counts × calibrated
/// rates"). Tuned to the rough word-to-token ratio of English prose and an
/// extraction pass whose output is smaller than its input; the per-token
/// rate is a placeholder calibrated against a mid-tier hosted model's
/// blended input/output price.
fn estimate_cost(text: &str) -> CostEstimate {
    const WORDS_TO_TOKENS: f64 = 1.3;
    const OUTPUT_TO_INPUT_RATIO: f64 = 0.25;
    const USD_PER_TOKEN: f64 = 0.000002;

    let words = text.split_whitespace().count() as f64;
    let tokens_in = (words * WORDS_TO_TOKENS).round() as u64;
    let tokens_out = ((tokens_in as f64) * OUTPUT_TO_INPUT_RATIO).round() as u64;
    let approx_cost_usd = ((tokens_in + tokens_out) as f64) * USD_PER_TOKEN;

    CostEstimate {
        tokens_in,
        tokens_out,
        approx_cost_usd,
    }
}

fn plan_chunks(text: &str, target_words: usize, overlap_words: usize) -> ChunkPlan {
    let chunks = chunk_ingestion(text, target_words, overlap_words);
    ChunkPlan {
        count: chunks.len(),
        target_words,
        overlap_words,
        strategy: ChunkingStrategy::Paragraph,
    }
}

/// Submit a job (spec.md §6 "Submission contract"): dedup-check unless
/// `force`, compute the cost estimate and chunk plan, and either gate on
/// approval or auto-approve. Never creates a job on validation failure —
/// callers are expected to validate `ontology`/`kind`/file support before
/// calling this (spec.md §7 "Validation ... never creates a job").
pub async fn submit(relational: &dyn RelationalStore, req: SubmissionRequest, approval_ttl_secs: i64) -> StoreResult<SubmissionOutcome> {
    let dedup_key = stratum_utils::dedup_key(&req.text, &req.ontology);

    if !req.force {
        if let Some(existing) = relational.find_job_by_dedup_key(&dedup_key, &req.ontology).await? {
            if existing.state.is_terminal() {
                return Ok(SubmissionOutcome::Duplicate(existing));
            }
        }
    }

    let cost_estimate = estimate_cost(&req.text);
    let chunk_plan = plan_chunks(&req.text, req.target_words, req.overlap_words);

    let (state, approval_deadline) = if req.auto_approve {
        (JobState::Approved, None)
    } else {
        (JobState::AwaitingApproval, Some(Utc::now() + Duration::seconds(approval_ttl_secs)))
    };

    let document_name = req.filename.clone().unwrap_or_else(|| req.ontology.clone());

    let job = Job {
        id: Uuid::new_v4(),
        kind: req.kind,
        owner: req.owner,
        ontology: req.ontology,
        submitted_at: Utc::now(),
        state,
        cost_estimate: Some(cost_estimate),
        chunk_plan: Some(chunk_plan),
        processing_mode: req.processing_mode,
        progress: Progress::default(),
        result: None,
        error: None,
        dedup_key,
        force: req.force,
        approval_deadline,
        terminal_at: None,
        client_request_id: req.client_request_id,
        worker_id: None,
        retry_count: 0,
        document_name,
        input: JobInput::Inline(req.text.clone()),
    };
    debug_assert!(job.invariants_hold());

    relational.insert_job(job.clone()).await?;
    Ok(SubmissionOutcome::Created(job))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use stratum_store::{InMemoryGraphStore, InMemoryRelationalStore};

    fn request(text: &str, force: bool, auto_approve: bool) -> SubmissionRequest {
        SubmissionRequest {
            owner: "alice".to_string(),
            ontology: "physics".to_string(),
            kind: JobKind::IngestText,
            text: text.to_string(),
            target_words: 1000,
            overlap_words: 200,
            processing_mode: ProcessingMode::Serial,
            force,
            auto_approve,
            client_request_id: None,
        }
    }

    #[tokio::test]
    async fn auto_approve_skips_the_approval_gate() {
        let graph: Arc<dyn stratum_store::GraphStore> = Arc::new(InMemoryGraphStore::new());
        let relational = InMemoryRelationalStore::new(graph);

        let outcome = submit(&relational, request("Some short document text.", false, true), 86_400).await.unwrap();
        match outcome {
            SubmissionOutcome::Created(job) => {
                assert_eq!(job.state, JobState::Approved);
                assert!(job.approval_deadline.is_none());
            }
            SubmissionOutcome::Duplicate(_) => panic!("expected a new job"),
        }
    }

    #[tokio::test]
    async fn gated_submission_sets_an_approval_deadline() {
        let graph: Arc<dyn stratum_store::GraphStore> = Arc::new(InMemoryGraphStore::new());
        let relational = InMemoryRelationalStore::new(graph);

        let outcome = submit(&relational, request("Some short document text.", false, false), 86_400).await.unwrap();
        match outcome {
            SubmissionOutcome::Created(job) => {
                assert_eq!(job.state, JobState::AwaitingApproval);
                assert!(job.approval_deadline.is_some());
            }
            SubmissionOutcome::Duplicate(_) => panic!("expected a new job"),
        }
    }

    #[tokio::test]
    async fn resubmitting_a_completed_job_without_force_returns_the_duplicate() {
        let graph: Arc<dyn stratum_store::GraphStore> = Arc::new(InMemoryGraphStore::new());
        let relational = InMemoryRelationalStore::new(graph);

        let text = "Identical ingestion text.";
        let outcome = submit(&relational, request(text, false, true), 86_400).await.unwrap();
        let SubmissionOutcome::Created(mut job) = outcome else {
            panic!("expected a new job");
        };

        relational.update_state_atomically(job.id, JobState::Approved, JobState::Queued, Default::default()).await.unwrap();
        relational.update_state_atomically(job.id, JobState::Queued, JobState::Processing, Default::default()).await.unwrap();
        let patch = stratum_store::JobPatch {
            result: Some(stratum_models::JobResult {
                stats: Default::default(),
                warnings: vec![],
                duplicate_of: None,
            }),
            terminal_at: Some(Utc::now()),
            ..Default::default()
        };
        relational.update_state_atomically(job.id, JobState::Processing, JobState::Completed, patch).await.unwrap();
        job.state = JobState::Completed;

        let second = submit(&relational, request(text, false, true), 86_400).await.unwrap();
        match second {
            SubmissionOutcome::Duplicate(existing) => assert_eq!(existing.id, job.id),
            SubmissionOutcome::Created(_) => panic!("expected a duplicate hit"),
        }
    }

    #[tokio::test]
    async fn force_bypasses_duplicate_detection() {
        let graph: Arc<dyn stratum_store::GraphStore> = Arc::new(InMemoryGraphStore::new());
        let relational = InMemoryRelationalStore::new(graph);

        let text = "Identical ingestion text.";
        submit(&relational, request(text, false, true), 86_400).await.unwrap();
        let second = submit(&relational, request(text, true, true), 86_400).await.unwrap();
        assert!(matches!(second, SubmissionOutcome::Created(_)));
    }
}
