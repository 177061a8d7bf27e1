use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use crate::error::StoreResult;
use crate::object::ObjectStore;

/// In-memory `ObjectStore` double (SPEC_FULL.md "Ambient: Testing").
#[derive(Default, Clone)]
pub struct InMemoryObjectStore {
    objects: Arc<DashMap<String, Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> StoreResult<()> {
        self.objects.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.objects.get(key).map(|e| e.value().clone()))
    }

    async fn list_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .objects
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| k.starts_with(prefix))
            .collect())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.objects.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = InMemoryObjectStore::new();
        store.put("artifacts/foo/1.json", b"hi".to_vec()).await.unwrap();
        let got = store.get("artifacts/foo/1.json").await.unwrap();
        assert_eq!(got, Some(b"hi".to_vec()));
    }

    #[tokio::test]
    async fn list_prefix_filters_keys() {
        let store = InMemoryObjectStore::new();
        store.put("sources/a/1.txt", vec![1]).await.unwrap();
        store.put("sources/b/1.txt", vec![2]).await.unwrap();
        let keys = store.list_prefix("sources/a/").await.unwrap();
        assert_eq!(keys, vec!["sources/a/1.txt".to_string()]);
    }
}
