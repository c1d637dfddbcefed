//! Document repository service.
//!
//! Coordinates the metadata store, the object store and the embedding worker.
//! Every public operation takes the requesting principal and applies the
//! access policy before touching any state.

mod counters;
mod embedding_status;
mod lifecycle;
mod workers;

pub use embedding_status::EmbeddingReport;
pub use lifecycle::{DocumentPage, ListQuery, PayloadUpload};

use std::future::Future;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::StaticConfig;
use crate::db::Database;
use crate::embedding::EmbeddingClient;
use crate::error::{ServiceResult, StorageError};
use crate::storage::ObjectStore;

/// Main service coordinator
pub struct DocVaultService {
    pub config: Arc<StaticConfig>,
    pub db: Arc<Database>,
    pub store: Arc<dyn ObjectStore>,
    pub embedding: Arc<EmbeddingClient>,
}

impl DocVaultService {
    pub fn new(
        config: Arc<StaticConfig>,
        db: Arc<Database>,
        store: Arc<dyn ObjectStore>,
    ) -> ServiceResult<Self> {
        let embedding = Arc::new(EmbeddingClient::new(&config.embedding)?);
        match &config.embedding.worker_url {
            Some(url) if embedding.is_enabled() => {
                info!(url = %url, "Embedding worker trigger enabled")
            }
            _ => warn!("No embedding worker configured; uploads will stay pending"),
        }

        Ok(Self {
            config,
            db,
            store,
            embedding,
        })
    }
}

/// Run an object store call, retrying once on failure.
async fn with_storage_retry<T, F, Fut>(key: &str, mut op: F) -> Result<T, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    match op().await {
        Ok(value) => Ok(value),
        // A missing object will still be missing on retry
        Err(e @ StorageError::ObjectNotFound { .. }) => Err(e),
        Err(e) => {
            warn!(key = %key, error = %e, "Object store call failed, retrying once");
            op().await
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::access::{Principal, Role};
    use crate::config::StaticConfig;
    use crate::storage::MemoryObjectStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    pub(crate) struct Harness {
        pub service: Arc<DocVaultService>,
        pub store: Arc<MemoryObjectStore>,
    }

    impl Harness {
        /// Read the stored row directly, bypassing access checks and counters
        pub fn db_doc(&self, id: &str) -> crate::db::Document {
            self.service.db.get_document(id).unwrap().unwrap()
        }
    }

    pub(crate) fn harness_with(config: StaticConfig) -> Harness {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = Arc::new(MemoryObjectStore::new());
        let service =
            DocVaultService::new(Arc::new(config), db, store.clone() as Arc<dyn ObjectStore>)
                .unwrap();
        Harness {
            service: Arc::new(service),
            store,
        }
    }

    pub(crate) fn harness() -> Harness {
        harness_with(StaticConfig::default())
    }

    pub(crate) fn user(id: &str, dept: Option<&str>) -> Principal {
        Principal::new(id, dept, Role::User)
    }

    pub(crate) fn admin(id: &str) -> Principal {
        Principal::new(id, None, Role::Admin)
    }

    #[tokio::test]
    async fn test_storage_retry_recovers_from_one_failure() {
        let attempts = AtomicU32::new(0);
        let result = with_storage_retry("k", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(StorageError::Unavailable {
                        key: "k".to_string(),
                    })
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_storage_retry_gives_up_after_second_failure() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_storage_retry("k", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err(StorageError::Unavailable {
                    key: "k".to_string(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_storage_retry_does_not_retry_missing_objects() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_storage_retry("k", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err(StorageError::ObjectNotFound {
                    key: "k".to_string(),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(StorageError::ObjectNotFound { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
