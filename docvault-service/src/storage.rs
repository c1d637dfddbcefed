//! Object storage for document payloads.
//!
//! Objects are addressed by keys produced by [`path::allocate`]. The object
//! store is subordinate to the metadata store: a key only matters while a live
//! document row references it.

pub mod fs;
pub mod hash;
pub mod memory;
pub mod path;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::info;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::StorageError;

pub use fs::FsObjectStore;
pub use memory::MemoryObjectStore;

/// Key/value store for payload bytes
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write an object, replacing any existing object under `key`.
    async fn put(&self, key: &str, data: Bytes) -> Result<(), StorageError>;

    async fn get(&self, key: &str) -> Result<Bytes, StorageError>;

    /// Delete an object. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Build the configured object store
pub fn from_config(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>, StorageError> {
    match config.backend {
        StorageBackend::Filesystem => {
            let root = config.data_dir.join("objects");
            std::fs::create_dir_all(&root).map_err(|e| StorageError::Io {
                key: root.display().to_string(),
                source: e,
            })?;
            info!(root = %root.display(), "Using filesystem object store");
            Ok(Arc::new(FsObjectStore::new(root)))
        }
        StorageBackend::Memory => {
            info!("Using in-memory object store; payloads are lost on restart");
            Ok(Arc::new(MemoryObjectStore::new()))
        }
    }
}
