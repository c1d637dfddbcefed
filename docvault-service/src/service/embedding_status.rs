//! Embedding status reports, retries and startup reconciliation.

use serde::Deserialize;
use tracing::{info, warn};

use super::DocVaultService;
use crate::access::{Operation, Principal, authorize};
use crate::db::{Document, EmbeddingChunk, EmbeddingStatus};
use crate::embedding::EmbeddingJob;
use crate::error::{ServiceError, ServiceResult};

/// Status report posted by the embedding worker
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingReport {
    /// `content_hash` of the job being reported on
    pub content_hash: String,
    pub status: EmbeddingStatus,
    #[serde(default)]
    pub error: Option<String>,
    /// Required content of a `completed` report
    #[serde(default)]
    pub chunks: Vec<EmbeddingChunk>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub completed: usize,
    pub failed: usize,
}

impl DocVaultService {
    /// Apply a worker status report.
    pub fn report_embedding_status(
        &self,
        document_id: &str,
        report: EmbeddingReport,
    ) -> ServiceResult<Document> {
        let document = self
            .db
            .get_document(document_id)?
            .ok_or_else(|| ServiceError::not_found(document_id))?;
        if document.is_deleted() {
            return Err(ServiceError::ConflictOnDelete {
                document_id: document_id.to_string(),
            });
        }
        if document.storage_path.is_none() {
            return Err(ServiceError::validation(
                "document has no payload to embed",
            ));
        }
        if document.content_hash.as_deref() != Some(report.content_hash.as_str()) {
            return Err(superseded(document_id));
        }

        let applied = match report.status {
            EmbeddingStatus::Pending => {
                return Err(ServiceError::validation(
                    "workers cannot move a document back to pending",
                ));
            }
            EmbeddingStatus::Completed => {
                self.db
                    .complete_embedding(document_id, &report.content_hash, &report.chunks)?
            }
            status => {
                let error = match status {
                    EmbeddingStatus::Failed => Some(
                        report
                            .error
                            .unwrap_or_else(|| "embedding failed".to_string()),
                    ),
                    _ => None,
                };
                self.db.transition_embedding_status(
                    document_id,
                    &report.content_hash,
                    status.allowed_predecessors(),
                    status,
                    error.as_deref(),
                )?
            }
        };

        let current = self
            .db
            .get_document(document_id)?
            .ok_or_else(|| ServiceError::not_found(document_id))?;

        if !applied {
            if current.is_deleted() {
                return Err(ServiceError::ConflictOnDelete {
                    document_id: document_id.to_string(),
                });
            }
            if current.content_hash.as_deref() != Some(report.content_hash.as_str()) {
                return Err(superseded(document_id));
            }
            return Err(ServiceError::validation(format!(
                "cannot move embedding from {} to {}",
                current
                    .embedding_status
                    .map_or_else(|| "unset".to_string(), |s| s.to_string()),
                report.status
            )));
        }

        info!(
            doc_id = %document_id,
            status = %report.status,
            chunks = current.total_chunks,
            "Embedding status updated"
        );
        Ok(current)
    }

    /// Re-queue a document's payload for embedding
    pub fn retry_embedding(
        &self,
        principal: &Principal,
        document_id: &str,
    ) -> ServiceResult<Document> {
        let document = self.live_document(document_id)?;
        authorize(principal, &document, Operation::Write)?;

        let (Some(storage_path), Some(content_hash)) =
            (document.storage_path.clone(), document.content_hash.clone())
        else {
            return Err(ServiceError::PayloadNotReady {
                document_id: document_id.to_string(),
            });
        };
        if document.embedding_status == Some(EmbeddingStatus::Processing) {
            return Err(ServiceError::validation("embedding is already in progress"));
        }

        if !self.db.reset_embedding(document_id)? {
            return Err(ServiceError::ConflictOnDelete {
                document_id: document_id.to_string(),
            });
        }
        info!(doc_id = %document_id, principal = %principal.id, "Embedding re-queued");

        self.start_embedding_trigger(EmbeddingJob {
            document_id: document_id.to_string(),
            storage_path,
            content_hash,
        });

        self.db
            .get_document(document_id)?
            .ok_or_else(|| ServiceError::not_found(document_id))
    }

    /// Settle documents a previous process left in `processing`.
    ///
    /// Runs once on startup, before the HTTP listener accepts requests.
    pub fn reconcile_stuck_embeddings(&self) -> ServiceResult<ReconcileSummary> {
        let stuck = self
            .db
            .documents_with_embedding_status(EmbeddingStatus::Processing)?;
        let mut summary = ReconcileSummary::default();
        if stuck.is_empty() {
            return Ok(summary);
        }

        info!(count = stuck.len(), "Reconciling interrupted embeddings");
        for id in stuck {
            match self.db.settle_processing_embedding(&id) {
                Ok(Some(EmbeddingStatus::Completed)) => summary.completed += 1,
                Ok(Some(_)) => summary.failed += 1,
                Ok(None) => {}
                Err(e) => warn!(doc_id = %id, error = %e, "Failed to reconcile embedding"),
            }
        }

        Ok(summary)
    }
}

fn superseded(document_id: &str) -> ServiceError {
    warn!(doc_id = %document_id, "Ignoring embedding report for a replaced payload");
    ServiceError::validation("report is for a payload that has since been replaced")
}
