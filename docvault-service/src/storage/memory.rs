//! In-memory object store.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use super::ObjectStore;
use super::path::segments;
use crate::error::StorageError;

/// Process-local object store. Objects do not survive a restart.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: DashMap<String, Bytes>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    fail_deletes: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&self, flag: &AtomicBool, key: &str) -> Result<(), StorageError> {
        segments(key)?;
        if flag.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable {
                key: key.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
impl MemoryObjectStore {
    pub fn contains(&self, key: &str) -> bool {
        self.objects.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Make subsequent writes fail, for exercising compensation paths
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), StorageError> {
        self.check(&self.fail_writes, key)?;
        self.objects.insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        self.check(&self.fail_reads, key)?;
        self.objects
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::ObjectNotFound {
                key: key.to_string(),
            })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.check(&self.fail_deletes, key)?;
        self.objects.remove(key);
        Ok(())
    }
}
