use async_trait::async_trait;

use crate::error::StoreResult;

/// Thin typed facade over the object store (spec.md §4.A), keyed by the
/// namespaces in spec.md §6: `sources/{ontology}/{filename}`,
/// `images/{hash}.{ext}`, `artifacts/{type}/{id}.json`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> StoreResult<()>;
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;
    async fn list_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;
    async fn delete(&self, key: &str) -> StoreResult<()>;
}
