//! Filesystem-backed object store.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use super::ObjectStore;
use super::path::segments;
use crate::error::StorageError;

/// Stores each object as a file under `root`, one directory level per key
/// segment.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let mut path = self.root.clone();
        for segment in segments(key)? {
            path.push(segment);
        }
        Ok(path)
    }
}

fn io_error(key: &str, source: std::io::Error) -> StorageError {
    StorageError::Io {
        key: key.to_string(),
        source,
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        let parent = path
            .parent()
            .ok_or_else(|| StorageError::InvalidKey {
                key: key.to_string(),
            })?
            .to_path_buf();
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|e| io_error(key, e))?;

        // Write beside the target and rename so readers never see a partial object
        let tmp = parent.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        if let Err(e) = tokio::fs::write(&tmp, &data).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_error(key, e));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_error(key, e));
        }

        debug!(key = %key, size = data.len(), "Stored object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::ObjectNotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(io_error(key, e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(io_error(key, e)),
        }

        // Prune now-empty document and owner directories
        let mut dir = path.parent().map(PathBuf::from);
        while let Some(current) = dir {
            if current == self.root || tokio::fs::remove_dir(&current).await.is_err() {
                break;
            }
            dir = current.parent().map(PathBuf::from);
        }

        debug!(key = %key, "Deleted object");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_overwrite() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path().to_path_buf());

        store.put("u1/d1/a.pdf", Bytes::from_static(b"%PDF-1")).await.unwrap();
        store.put("u1/d1/a.pdf", Bytes::from_static(b"%PDF-2")).await.unwrap();

        assert_eq!(store.get("u1/d1/a.pdf").await.unwrap(), Bytes::from_static(b"%PDF-2"));
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("u1/d1"))
            .unwrap()
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_object() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path().to_path_buf());
        assert!(matches!(
            store.get("u1/d1/none.pdf").await,
            Err(StorageError::ObjectNotFound { .. })
        ));
        store.delete("u1/d1/none.pdf").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_prunes_empty_directories() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path().to_path_buf());
        store.put("u1/d1/a.pdf", Bytes::from_static(b"x")).await.unwrap();
        store.delete("u1/d1/a.pdf").await.unwrap();
        assert!(!dir.path().join("u1").exists());
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn test_rejects_traversal_keys() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path().to_path_buf());
        assert!(matches!(
            store.put("../escape.pdf", Bytes::from_static(b"x")).await,
            Err(StorageError::InvalidKey { .. })
        ));
    }
}
