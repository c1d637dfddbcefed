//! Background embedding trigger.

use metrics::counter;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::db::EmbeddingStatus;
use crate::embedding::EmbeddingJob;
use crate::error::format_error_chain;
use crate::service::DocVaultService;

impl DocVaultService {
    /// Notify the embedding worker about a new payload without blocking the
    /// caller. A failed trigger marks the document `failed` unless the
    /// payload was replaced meanwhile.
    pub fn start_embedding_trigger(&self, job: EmbeddingJob) -> JoinHandle<()> {
        let db = self.db.clone();
        let client = self.embedding.clone();

        tokio::spawn(async move {
            let document_id = &job.document_id;
            match client.trigger(&job).await {
                Ok(true) => {
                    counter!("docvault_embedding_triggers_total", "outcome" => "sent").increment(1);
                    info!(doc_id = %document_id, "Embedding worker notified");
                }
                Ok(false) => {
                    counter!("docvault_embedding_triggers_total", "outcome" => "skipped")
                        .increment(1);
                    debug!(doc_id = %document_id, "No embedding worker configured");
                }
                Err(e) => {
                    counter!("docvault_embedding_triggers_total", "outcome" => "failed")
                        .increment(1);
                    let message = format_error_chain(&e);
                    warn!(doc_id = %document_id, error = %message, "Embedding trigger failed");

                    match db.transition_embedding_status(
                        document_id,
                        &job.content_hash,
                        &[EmbeddingStatus::Pending],
                        EmbeddingStatus::Failed,
                        Some(&message),
                    ) {
                        Ok(true) => {}
                        // Deleted, re-uploaded or already picked up meanwhile
                        Ok(false) => debug!(doc_id = %document_id, "Trigger failure not recorded"),
                        Err(e) => {
                            error!(doc_id = %document_id, error = %e, "Failed to record trigger failure")
                        }
                    }
                }
            }
        })
    }
}
