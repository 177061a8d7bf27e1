use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::job::{JobError, JobResult, JobState};

/// An event a worker emits to the progress broker mid-job (spec.md §4.K).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: Uuid,
    pub stage: String,
    pub items_done: usize,
    pub items_total: usize,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub counters_delta: HashMap<String, u64>,
    pub level: EventLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Info,
    Warning,
}

/// The terminal event a subscriber always receives exactly once, after
/// which its channel closes (spec.md §4.K).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDone {
    pub job_id: Uuid,
    pub state: JobState,
    pub result: Option<JobResult>,
    pub error: Option<JobError>,
}

/// What travels over an SSE subscription: zero or more progress events,
/// then exactly one `Done`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Progress(ProgressEvent),
    Done(JobDone),
}
