//! Artifact store (spec.md §4.G): size-routed create, epoch-stamped
//! freshness, transparent read across both payload layouts. Grounded on the
//! platform's `RedisCache` wrapper (`database/src/cache.rs`) for the
//! tiered-storage shape and on `vector_rag::services::vector_store` for the
//! thin typed object-store client pattern.

use std::sync::Arc;

use chrono::Utc;
use stratum_models::{Artifact, ArtifactPayload};
use stratum_store::{ArtifactFilter, ObjectStore, RelationalStore, StoreError, StoreResult};
use uuid::Uuid;

/// Default inline/object-store routing cutoff (spec.md §4.G `INLINE_LIMIT`).
pub const DEFAULT_INLINE_LIMIT_BYTES: usize = 10 * 1024;

pub struct ArtifactStore {
    relational: Arc<dyn RelationalStore>,
    object: Arc<dyn ObjectStore>,
    inline_limit_bytes: usize,
}

impl ArtifactStore {
    pub fn new(relational: Arc<dyn RelationalStore>, object: Arc<dyn ObjectStore>, inline_limit_bytes: usize) -> Self {
        Self {
            relational,
            object,
            inline_limit_bytes,
        }
    }

    /// Create a new artifact, routing the payload inline or to the object
    /// store by serialized size (spec.md §4.G step "On create"). Callers
    /// pass `graph_epoch` from `GraphStore::current_graph_epoch` — the
    /// counter itself lives on the graph (spec.md §5 "single SQL
    /// sequence"), so this crate only stamps the value it's given.
    pub async fn create(
        &self,
        artifact_type: String,
        owner: String,
        params: serde_json::Value,
        payload: serde_json::Value,
        graph_epoch: i64,
        expires_at: Option<chrono::DateTime<Utc>>,
    ) -> StoreResult<Artifact> {
        let serialized = serde_json::to_vec(&payload).map_err(StoreError::Serialization)?;
        let id = Uuid::new_v4();

        let routed_payload = if serialized.len() <= self.inline_limit_bytes {
            ArtifactPayload::Inline(payload)
        } else {
            let key = format!("artifacts/{artifact_type}/{id}.json");
            self.object.put(&key, serialized).await?;
            ArtifactPayload::ObjectStore { key }
        };

        let artifact = Artifact {
            id,
            artifact_type,
            owner,
            params,
            payload: routed_payload,
            created_at: Utc::now(),
            graph_epoch,
            expires_at,
        };
        self.relational.create_artifact(artifact.clone()).await?;
        Ok(artifact)
    }

    /// Read an artifact, resolving inline vs. object-store payload layout
    /// transparently regardless of the currently configured inline limit
    /// (spec.md §9 "reader handles both layouts"). Returns the payload and
    /// whether it is stale relative to `current_epoch`.
    pub async fn read(&self, id: Uuid, current_epoch: i64) -> StoreResult<Option<(serde_json::Value, bool)>> {
        let Some(artifact) = self.relational.load_artifact(id).await? else {
            return Ok(None);
        };
        let payload = match &artifact.payload {
            ArtifactPayload::Inline(value) => value.clone(),
            ArtifactPayload::ObjectStore { key } => {
                let bytes = self
                    .object
                    .get(key)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(format!("artifact blob {key}")))?;
                serde_json::from_slice(&bytes).map_err(StoreError::Serialization)?
            }
        };
        Ok(Some((payload, artifact.is_stale(current_epoch))))
    }

    pub async fn list(&self, filter: ArtifactFilter) -> StoreResult<Vec<Artifact>> {
        self.relational.list_artifacts(filter).await
    }

    /// Hard-delete: remove the object-store blob first (if present), then
    /// the metadata row. A blob left behind by a crash between the two
    /// steps is a recoverable leak, never a correctness bug (spec.md §4.G).
    pub async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        let Some(artifact) = self.relational.delete_artifact(id).await? else {
            return Ok(false);
        };
        if let ArtifactPayload::ObjectStore { key } = &artifact.payload {
            if let Err(err) = self.object.delete(key).await {
                tracing::warn!(artifact_id = %id, key, error = %err, "failed to delete artifact blob, leaving orphaned object");
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_store::{InMemoryGraphStore, InMemoryObjectStore, InMemoryRelationalStore};

    fn stores() -> (Arc<dyn RelationalStore>, Arc<dyn ObjectStore>) {
        let graph: Arc<dyn stratum_store::GraphStore> = Arc::new(InMemoryGraphStore::new());
        let relational: Arc<dyn RelationalStore> = Arc::new(InMemoryRelationalStore::new(graph));
        let object: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
        (relational, object)
    }

    #[tokio::test]
    async fn small_payload_is_stored_inline() {
        let (relational, object) = stores();
        let store = ArtifactStore::new(relational, object, DEFAULT_INLINE_LIMIT_BYTES);
        let artifact = store
            .create(
                "polarity".to_string(),
                "alice".to_string(),
                serde_json::json!({}),
                serde_json::json!({"score": 0.5}),
                3,
                None,
            )
            .await
            .unwrap();
        assert!(matches!(artifact.payload, ArtifactPayload::Inline(_)));
    }

    #[tokio::test]
    async fn large_payload_is_routed_to_object_store() {
        let (relational, object) = stores();
        let store = ArtifactStore::new(relational, object, 16);
        let artifact = store
            .create(
                "projection".to_string(),
                "alice".to_string(),
                serde_json::json!({}),
                serde_json::json!({"data": "x".repeat(1000)}),
                1,
                None,
            )
            .await
            .unwrap();
        assert!(matches!(artifact.payload, ArtifactPayload::ObjectStore { .. }));
    }

    #[tokio::test]
    async fn read_reports_staleness_against_current_epoch() {
        let (relational, object) = stores();
        let store = ArtifactStore::new(relational, object, DEFAULT_INLINE_LIMIT_BYTES);
        let artifact = store
            .create("search".to_string(), "bob".to_string(), serde_json::json!({}), serde_json::json!({"q": 1}), 5, None)
            .await
            .unwrap();

        let (_, fresh) = store.read(artifact.id, 5).await.unwrap().unwrap();
        assert!(!fresh);
        let (_, stale) = store.read(artifact.id, 6).await.unwrap().unwrap();
        assert!(stale);
    }

    #[tokio::test]
    async fn delete_removes_blob_and_row() {
        let (relational, object) = stores();
        let store = ArtifactStore::new(relational, object, 16);
        let artifact = store
            .create(
                "projection".to_string(),
                "alice".to_string(),
                serde_json::json!({}),
                serde_json::json!({"data": "x".repeat(1000)}),
                1,
                None,
            )
            .await
            .unwrap();

        assert!(store.delete(artifact.id).await.unwrap());
        assert!(store.read(artifact.id, 1).await.unwrap().is_none());
        assert!(!store.delete(artifact.id).await.unwrap());
    }
}
