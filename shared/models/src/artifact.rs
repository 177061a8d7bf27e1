use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where an artifact's payload actually lives — see spec.md §4.G
/// "size-routed persistence". Readers must handle both layouts regardless
/// of the currently configured `INLINE_LIMIT` (spec.md §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactPayload {
    Inline(serde_json::Value),
    ObjectStore { key: String },
}

/// A named, owner-scoped, parameterized computed result (spec.md §3
/// "Artifact").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    pub artifact_type: String,
    pub owner: String,
    pub params: serde_json::Value,
    pub payload: ArtifactPayload,
    pub created_at: DateTime<Utc>,
    pub graph_epoch: i64,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Artifact {
    /// spec.md §8 "Artifact freshness": fresh iff `graph_epoch` equals the
    /// counter observed at read time.
    pub fn is_stale(&self, current_epoch: i64) -> bool {
        self.graph_epoch != current_epoch
    }
}
