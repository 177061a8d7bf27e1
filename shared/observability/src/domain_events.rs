//! Domain event logging for the ingestion control plane.
//!
//! Provides structured logging for business domain events with consistent schema.

use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Result of a domain operation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum OperationResult {
    Success,
    Failure,
    Partial,
    Skipped,
}

impl std::fmt::Display for OperationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Partial => write!(f, "partial"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Categories of domain events for filtering and routing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Job,
    Chunking,
    Embedding,
    Matching,
    Upsert,
    Artifact,
    Api,
    System,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Job => write!(f, "job"),
            Self::Chunking => write!(f, "chunking"),
            Self::Embedding => write!(f, "embedding"),
            Self::Matching => write!(f, "matching"),
            Self::Upsert => write!(f, "upsert"),
            Self::Artifact => write!(f, "artifact"),
            Self::Api => write!(f, "api"),
            Self::System => write!(f, "system"),
        }
    }
}

/// A structured domain event for logging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub timestamp: DateTime<Utc>,
    pub category: EventCategory,
    /// Specific event type (e.g., "job_started", "concept_matched")
    pub event_type: String,
    /// Entity type being operated on (e.g., "job", "source", "concept")
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub result: OperationResult,
    pub duration_ms: Option<u64>,
    pub attempt: Option<u32>,
    pub error: Option<String>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    /// Service that emitted the event
    pub service: String,
    pub metadata: Option<serde_json::Value>,
}

impl DomainEvent {
    pub fn new(service: impl Into<String>, category: EventCategory, event_type: impl Into<String>) -> DomainEventBuilder {
        DomainEventBuilder {
            service: service.into(),
            category,
            event_type: event_type.into(),
            entity_type: None,
            entity_id: None,
            result: OperationResult::Success,
            duration_ms: None,
            attempt: None,
            error: None,
            trace_id: None,
            span_id: None,
            metadata: None,
        }
    }
}

/// Builder for constructing domain events
pub struct DomainEventBuilder {
    service: String,
    category: EventCategory,
    event_type: String,
    entity_type: Option<String>,
    entity_id: Option<String>,
    result: OperationResult,
    duration_ms: Option<u64>,
    attempt: Option<u32>,
    error: Option<String>,
    trace_id: Option<String>,
    span_id: Option<String>,
    metadata: Option<serde_json::Value>,
}

impl DomainEventBuilder {
    pub fn entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn result(mut self, result: OperationResult) -> Self {
        self.result = result;
        self
    }

    pub fn success(mut self) -> Self {
        self.result = OperationResult::Success;
        self
    }

    pub fn failure(mut self, error: impl Into<String>) -> Self {
        self.result = OperationResult::Failure;
        self.error = Some(error.into());
        self
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn trace(mut self, trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self.span_id = Some(span_id.into());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Build and emit the event as a log
    pub fn emit(self) {
        let event = self.build();
        let json = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());

        match event.result {
            OperationResult::Success => tracing::info!(
                target: "domain_event",
                category = %event.category,
                event_type = %event.event_type,
                result = "success",
                "DomainEvent: {}", json
            ),
            OperationResult::Failure => tracing::error!(
                target: "domain_event",
                category = %event.category,
                event_type = %event.event_type,
                result = "failure",
                error = ?event.error,
                "DomainEvent: {}", json
            ),
            OperationResult::Partial => tracing::warn!(
                target: "domain_event",
                category = %event.category,
                event_type = %event.event_type,
                result = "partial",
                "DomainEvent: {}", json
            ),
            OperationResult::Skipped => tracing::debug!(
                target: "domain_event",
                category = %event.category,
                event_type = %event.event_type,
                result = "skipped",
                "DomainEvent: {}", json
            ),
        }
    }

    /// Build the event without emitting
    pub fn build(self) -> DomainEvent {
        DomainEvent {
            timestamp: Utc::now(),
            category: self.category,
            event_type: self.event_type,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            result: self.result,
            duration_ms: self.duration_ms,
            attempt: self.attempt,
            error: self.error,
            trace_id: self.trace_id,
            span_id: self.span_id,
            service: self.service,
            metadata: self.metadata,
        }
    }
}

// ============================================================================
// Convenience functions for common domain events
// ============================================================================

pub fn log_job_started(service: &str, job_id: Uuid, job_kind: &str) {
    DomainEvent::new(service, EventCategory::Job, "job_started")
        .entity("job", job_id.to_string())
        .metadata(serde_json::json!({ "job_kind": job_kind }))
        .success()
        .emit();
}

pub fn log_job_completed(service: &str, job_id: Uuid, duration_ms: u64) {
    DomainEvent::new(service, EventCategory::Job, "job_completed")
        .entity("job", job_id.to_string())
        .duration_ms(duration_ms)
        .success()
        .emit();
}

pub fn log_job_failed(service: &str, job_id: Uuid, error: &str, duration_ms: u64) {
    DomainEvent::new(service, EventCategory::Job, "job_failed")
        .entity("job", job_id.to_string())
        .duration_ms(duration_ms)
        .failure(error)
        .emit();
}

pub fn log_source_chunked(service: &str, source_id: &str, chunks_created: usize, duration_ms: u64) {
    DomainEvent::new(service, EventCategory::Chunking, "source_chunked")
        .entity("source", source_id)
        .duration_ms(duration_ms)
        .metadata(serde_json::json!({ "chunks_created": chunks_created }))
        .success()
        .emit();
}

pub fn log_embedding_generated(service: &str, chunk_id: &str, model: &str, duration_ms: u64) {
    DomainEvent::new(service, EventCategory::Embedding, "embedding_generated")
        .entity("chunk", chunk_id)
        .duration_ms(duration_ms)
        .metadata(serde_json::json!({ "model": model }))
        .success()
        .emit();
}

pub fn log_concept_matched(service: &str, concept_id: &str, decision: &str, score: f32) {
    DomainEvent::new(service, EventCategory::Matching, "concept_matched")
        .entity("concept", concept_id)
        .metadata(serde_json::json!({ "decision": decision, "score": score }))
        .success()
        .emit();
}

pub fn log_artifact_persisted(service: &str, artifact_id: &str, payload_kind: &str, bytes: usize) {
    DomainEvent::new(service, EventCategory::Artifact, "artifact_persisted")
        .entity("artifact", artifact_id)
        .metadata(serde_json::json!({ "payload_kind": payload_kind, "bytes": bytes }))
        .success()
        .emit();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_event_builder() {
        let event = DomainEvent::new("test-service", EventCategory::Job, "job_started")
            .entity("job", "123")
            .duration_ms(100)
            .success()
            .build();

        assert_eq!(event.service, "test-service");
        assert_eq!(event.event_type, "job_started");
        assert_eq!(event.entity_id, Some("123".to_string()));
        assert_eq!(event.result, OperationResult::Success);
    }
}
