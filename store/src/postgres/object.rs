use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;

use crate::error::{StoreError, StoreResult};
use crate::object::ObjectStore;

/// Filesystem-backed `ObjectStore`, the default deployment target named in
/// spec.md §4.A ("local disk or S3-compatible"). Keys are namespaced paths
/// (`sources/{ontology}/{filename}`, `artifacts/{type}/{id}.json`) and are
/// joined onto `root` unchanged, so callers own collision-avoidance.
pub struct FilesystemObjectStore {
    root: PathBuf,
}

impl FilesystemObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> StoreResult<PathBuf> {
        if key.contains("..") {
            return Err(StoreError::Integrity(format!(
                "object key must not contain '..': {key}"
            )));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> StoreResult<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let base = self.path_for(prefix)?;
        let parent = if base.is_dir() {
            base
        } else {
            base.parent().map(PathBuf::from).unwrap_or(self.root.clone())
        };
        let mut out = Vec::new();
        let mut entries = match fs::read_dir(&parent).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if let Ok(relative) = entry.path().strip_prefix(&self.root) {
                let key = relative.to_string_lossy().replace('\\', "/");
                if key.starts_with(prefix) {
                    out.push(key);
                }
            }
        }
        Ok(out)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
