//! View and download counters.

use super::DocVaultService;
use crate::db::Counter;
use crate::error::{ServiceError, ServiceResult};

impl DocVaultService {
    /// Atomically increment a counter and return its new value.
    ///
    /// The increment happens inside the metadata store, so concurrent readers
    /// never lose or reverse each other's updates.
    pub fn increment(&self, document_id: &str, counter: Counter) -> ServiceResult<u64> {
        self.db
            .increment_counter(document_id, counter)?
            .ok_or_else(|| ServiceError::not_found(document_id))
    }
}
