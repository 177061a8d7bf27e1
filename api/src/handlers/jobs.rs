use std::sync::Arc;

use actix_web::{web, HttpResponse};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use stratum_jobs::submission::{submit, SubmissionOutcome, SubmissionRequest};
use stratum_models::{JobKind, JobState, ProcessingMode};
use stratum_store::{JobPatch, RelationalStore, StoreError};
use uuid::Uuid;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub owner: String,
    pub ontology: String,
    #[serde(default = "default_kind")]
    pub kind: JobKind,
    pub text: String,
    pub filename: Option<String>,
    pub target_words: Option<usize>,
    pub overlap_words: Option<usize>,
    #[serde(default)]
    pub processing_mode: ProcessingMode,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub auto_approve: bool,
    pub client_request_id: Option<String>,
}

fn default_kind() -> JobKind {
    JobKind::IngestText
}

#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: Uuid,
    pub state: JobState,
    pub duplicate: bool,
    pub cost_estimate: Option<stratum_models::CostEstimate>,
}

/// `POST /jobs` — the submission contract (spec.md §6 "Submission
/// contract"). Handler only deserializes, delegates to
/// `stratum_jobs::submission::submit`, and serializes — no business logic
/// lives here, matching `chunker::handlers::jobs::start_chunk_job`'s
/// resolve-then-delegate shape.
pub async fn submit_job(state: web::Data<Arc<AppState>>, body: web::Json<SubmitJobRequest>) -> HttpResponse {
    let req = body.into_inner();
    let defaults = &state.config.chunking_defaults;

    let submission = SubmissionRequest {
        owner: req.owner,
        ontology: req.ontology,
        kind: req.kind,
        text: req.text,
        filename: req.filename,
        target_words: req.target_words.unwrap_or(defaults.target_words),
        overlap_words: req.overlap_words.unwrap_or(defaults.overlap_words),
        processing_mode: req.processing_mode,
        force: req.force,
        auto_approve: req.auto_approve,
        client_request_id: req.client_request_id,
    };

    match submit(state.relational.as_ref(), submission, state.config.approval_ttl_secs).await {
        Ok(SubmissionOutcome::Created(job)) => HttpResponse::Accepted().json(SubmitJobResponse {
            job_id: job.id,
            state: job.state,
            duplicate: false,
            cost_estimate: job.cost_estimate,
        }),
        Ok(SubmissionOutcome::Duplicate(job)) => HttpResponse::Ok().json(SubmitJobResponse {
            job_id: job.id,
            state: job.state,
            duplicate: true,
            cost_estimate: job.cost_estimate,
        }),
        Err(err) => store_error_response(&err),
    }
}

/// `POST /jobs/{id}/approve` — transitions `pending`/`awaiting_approval` ->
/// `approved` (spec.md §6 "Approval contract").
pub async fn approve_job(state: web::Data<Arc<AppState>>, path: web::Path<Uuid>) -> HttpResponse {
    let job_id = path.into_inner();
    let job = match state.relational.load_job(job_id).await {
        Ok(Some(job)) => job,
        Ok(None) => return HttpResponse::NotFound().json(error_body("job not found")),
        Err(err) => return store_error_response(&err),
    };

    if !matches!(job.state, JobState::Pending | JobState::AwaitingApproval) {
        return HttpResponse::Conflict().json(error_body(&format!("job is {:?}, not awaiting approval", job.state)));
    }

    let patch = JobPatch {
        approval_deadline: Some(None),
        ..Default::default()
    };
    match state
        .relational
        .update_state_atomically(job_id, job.state, JobState::Approved, patch)
        .await
    {
        Ok(true) => HttpResponse::Ok().json(serde_json::json!({ "job_id": job_id, "state": "approved" })),
        Ok(false) => HttpResponse::Conflict().json(error_body("approval lost the race to a concurrent transition")),
        Err(err) => store_error_response(&err),
    }
}

/// `POST /jobs/{id}/cancel` — any non-terminal state -> `cancelled`
/// (spec.md §6 "Approval contract"). A job already `processing` also gets
/// its cancellation flag set so the running worker observes it between
/// chunks (spec.md §4.I "cancellable task").
pub async fn cancel_job(state: web::Data<Arc<AppState>>, path: web::Path<Uuid>) -> HttpResponse {
    let job_id = path.into_inner();
    let job = match state.relational.load_job(job_id).await {
        Ok(Some(job)) => job,
        Ok(None) => return HttpResponse::NotFound().json(error_body("job not found")),
        Err(err) => return store_error_response(&err),
    };

    if job.state.is_terminal() {
        return HttpResponse::Conflict().json(error_body("job has already reached a terminal state"));
    }

    if job.state == JobState::Processing {
        state.cancellation.request_cancel(job_id);
        return HttpResponse::Accepted().json(serde_json::json!({ "job_id": job_id, "state": "cancel_requested" }));
    }

    let patch = JobPatch {
        error: Some(stratum_models::JobError::new(
            stratum_models::ErrorKind::Cancelled,
            "cancelled before processing started",
        )),
        terminal_at: Some(chrono::Utc::now()),
        approval_deadline: Some(None),
        ..Default::default()
    };
    match state.relational.update_state_atomically(job_id, job.state, JobState::Cancelled, patch).await {
        Ok(true) => HttpResponse::Ok().json(serde_json::json!({ "job_id": job_id, "state": "cancelled" })),
        Ok(false) => HttpResponse::Conflict().json(error_body("cancel lost the race to a concurrent transition")),
        Err(err) => store_error_response(&err),
    }
}

/// `GET /jobs/{id}` — poll contract (spec.md §6 "Status contract").
pub async fn get_job(state: web::Data<Arc<AppState>>, path: web::Path<Uuid>) -> HttpResponse {
    match state.relational.load_job(path.into_inner()).await {
        Ok(Some(job)) => HttpResponse::Ok().json(job),
        Ok(None) => HttpResponse::NotFound().json(error_body("job not found")),
        Err(err) => store_error_response(&err),
    }
}

/// `GET /jobs/{id}/stream` — SSE contract (spec.md §6 "Status contract",
/// §4.K). One `text/event-stream` response per subscriber, wrapping the
/// broker's broadcast stream the way `actix-web`'s `HttpResponse::streaming`
/// wraps any `Stream<Item = Result<Bytes, Error>>`.
pub async fn stream_job(state: web::Data<Arc<AppState>>, path: web::Path<Uuid>) -> HttpResponse {
    let job_id = path.into_inner();
    let events = match state.broker.subscribe(job_id).await {
        Ok(events) => events,
        Err(StoreError::NotFound(msg)) => return HttpResponse::NotFound().json(error_body(&msg)),
        Err(err) => return store_error_response(&err),
    };

    let body = events.map(|event| {
        let payload = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok::<_, actix_web::Error>(actix_web::web::Bytes::from(format!("data: {payload}\n\n")))
    });

    HttpResponse::Ok().content_type("text/event-stream").streaming(body)
}

fn error_body(message: &str) -> serde_json::Value {
    serde_json::json!({ "error": { "kind": "validation", "message": message } })
}

fn store_error_response(err: &StoreError) -> HttpResponse {
    match err {
        StoreError::NotFound(msg) => HttpResponse::NotFound().json(error_body(msg)),
        StoreError::Conflict(msg) => HttpResponse::Conflict().json(error_body(msg)),
        other => {
            tracing::error!(error = %other, "store error handling job request");
            HttpResponse::InternalServerError().json(error_body("internal error"))
        }
    }
}
