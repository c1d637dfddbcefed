//! Embedding chunk storage.
//!
//! Rows are written only by worker callbacks and removed whenever the
//! document is re-uploaded, re-queued or soft-deleted.

use chrono::Utc;
use rusqlite::params;

use super::models::{EmbeddingChunk, EmbeddingStatus};
use super::{Database, timestamp};
use crate::error::{DatabaseError, ServiceResult};

fn embedding_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

impl Database {
    /// Replace a document's chunks and mark it `completed`.
    ///
    /// Returns false, writing nothing, if the document is not live, its
    /// payload no longer has `content_hash`, or its status does not allow
    /// completion.
    pub fn complete_embedding(
        &self,
        document_id: &str,
        content_hash: &str,
        chunks: &[EmbeddingChunk],
    ) -> ServiceResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(DatabaseError::Query)?;
        let now = timestamp(Utc::now());

        let rows = tx
            .execute(
                "UPDATE documents SET embedding_status = ?1, embedding_error = NULL, \
                 total_chunks = ?2, updated_at = ?3 \
                 WHERE id = ?4 AND deleted_at IS NULL AND storage_path IS NOT NULL \
                 AND content_hash = ?5 AND embedding_status IN (?6, ?7)",
                params![
                    EmbeddingStatus::Completed.to_string(),
                    chunks.len() as i64,
                    now,
                    document_id,
                    content_hash,
                    EmbeddingStatus::Pending.to_string(),
                    EmbeddingStatus::Processing.to_string(),
                ],
            )
            .map_err(DatabaseError::Query)?;

        if rows == 0 {
            return Ok(false);
        }

        tx.execute(
            "DELETE FROM document_embeddings WHERE document_id = ?1",
            params![document_id],
        )
        .map_err(DatabaseError::Query)?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO document_embeddings (document_id, chunk_index, chunk_text, embedding, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .map_err(DatabaseError::Query)?;
            for chunk in chunks {
                stmt.execute(params![
                    document_id,
                    chunk.chunk_index,
                    chunk.chunk_text,
                    embedding_bytes(&chunk.embedding),
                    now,
                ])
                .map_err(DatabaseError::Query)?;
            }
        }

        tx.commit().map_err(DatabaseError::Query)?;
        Ok(true)
    }

    /// Settle a document left in `processing` by an interrupted worker.
    ///
    /// Stored chunks mean the worker finished writing, so the document is
    /// marked `completed`; otherwise it is marked `failed`. Returns the status
    /// written, or `None` if the document was no longer `processing`.
    pub fn settle_processing_embedding(
        &self,
        document_id: &str,
    ) -> ServiceResult<Option<EmbeddingStatus>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        let count: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM document_embeddings WHERE document_id = ?1",
                params![document_id],
                |row| row.get(0),
            )
            .map_err(DatabaseError::Query)?;

        let (status, total_chunks, error) = if count > 0 {
            (EmbeddingStatus::Completed, Some(count), None)
        } else {
            (
                EmbeddingStatus::Failed,
                None,
                Some("embedding interrupted by service restart"),
            )
        };

        let rows = tx
            .execute(
                "UPDATE documents SET embedding_status = ?1, total_chunks = ?2, embedding_error = ?3, updated_at = ?4 \
                 WHERE id = ?5 AND deleted_at IS NULL AND embedding_status = ?6",
                params![
                    status.to_string(),
                    total_chunks,
                    error,
                    timestamp(Utc::now()),
                    document_id,
                    EmbeddingStatus::Processing.to_string(),
                ],
            )
            .map_err(DatabaseError::Query)?;

        tx.commit().map_err(DatabaseError::Query)?;
        Ok((rows > 0).then_some(status))
    }

    /// Number of stored chunks for a document
    #[cfg(test)]
    pub fn count_embeddings(&self, document_id: &str) -> ServiceResult<u64> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM document_embeddings WHERE document_id = ?1",
                params![document_id],
                |row| row.get(0),
            )
            .map_err(DatabaseError::Query)?;
        Ok(count.max(0) as u64)
    }

    /// Load stored chunks in index order
    #[cfg(test)]
    pub fn get_embeddings(&self, document_id: &str) -> ServiceResult<Vec<EmbeddingChunk>> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(
                "SELECT chunk_index, chunk_text, embedding FROM document_embeddings \
                 WHERE document_id = ?1 ORDER BY chunk_index",
            )
            .map_err(DatabaseError::Query)?;
        let rows = stmt
            .query_map(params![document_id], |row| {
                let bytes: Vec<u8> = row.get(2)?;
                Ok(EmbeddingChunk {
                    chunk_index: row.get(0)?,
                    chunk_text: row.get(1)?,
                    embedding: bytes
                        .chunks_exact(4)
                        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                        .collect(),
                })
            })
            .map_err(DatabaseError::Query)?;

        let mut chunks = Vec::new();
        for row in rows {
            chunks.push(row.map_err(DatabaseError::Query)?);
        }
        Ok(chunks)
    }
}
