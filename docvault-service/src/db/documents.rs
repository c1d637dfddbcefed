//! Document CRUD operations.
//!
//! Every mutation is a single statement or a short transaction against one
//! document row, conditioned on `deleted_at IS NULL` so that a concurrent
//! soft delete always wins or loses as a whole.

use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, params, params_from_iter};

use super::models::{
    AttachedPayload, Counter, DOCUMENT_COLUMNS, Document, DocumentPatch, EmbeddingStatus, Page,
};
use super::{Database, timestamp};
use crate::access::Predicate;
use crate::error::{DatabaseError, ServiceResult};

/// Result of attaching a payload to a document row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachOutcome {
    Attached { previous_path: Option<String> },
    /// The row was soft-deleted before the write landed
    Deleted,
}

/// Result of soft-deleting a document row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftDeleteOutcome {
    pub storage_path: Option<String>,
    pub embeddings_removed: usize,
}

fn tags_json(tags: &[String]) -> Result<String, DatabaseError> {
    serde_json::to_string(tags).map_err(DatabaseError::Serialization)
}

impl Database {
    /// Insert a new document
    pub fn insert_document(&self, doc: &Document) -> ServiceResult<()> {
        let conn = self.conn()?;
        let tags = tags_json(&doc.tags)?;

        conn.execute(
            r#"
            INSERT INTO documents (id, file_name, original_file_name, document_type, department, access_level, owner_id, creator_name, storage_path, file_size, content_hash, version, category, tags, description, view_count, download_count, embedding_status, embedding_error, total_chunks, created_at, updated_at, deleted_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)
            "#,
            params![
                doc.id,
                doc.file_name,
                doc.original_file_name,
                doc.document_type.to_string(),
                doc.department,
                doc.access_level.to_string(),
                doc.owner_id,
                doc.creator_name,
                doc.storage_path,
                doc.file_size.map(|s| s as i64),
                doc.content_hash,
                doc.version,
                doc.category,
                tags,
                doc.description,
                doc.view_count as i64,
                doc.download_count as i64,
                doc.embedding_status.map(|s| s.to_string()),
                doc.embedding_error,
                doc.total_chunks.map(|t| t as i64),
                timestamp(doc.created_at),
                timestamp(doc.updated_at),
                doc.deleted_at.map(timestamp),
            ],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Get a document by ID, soft-deleted or not
    pub fn get_document(&self, id: &str) -> ServiceResult<Option<Document>> {
        let conn = self.conn()?;

        conn.query_row(
            &format!("SELECT {DOCUMENT_COLUMNS} FROM documents d WHERE d.id = ?1"),
            params![id],
            Document::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// List live documents matching `filter`, newest first, with the total
    /// number of matches across all pages.
    pub fn list_documents(
        &self,
        filter: &Predicate,
        page: Page,
    ) -> ServiceResult<(Vec<Document>, u64)> {
        let conn = self.conn()?;

        let mut params: Vec<Value> = Vec::new();
        let where_clause = format!(
            "d.deleted_at IS NULL AND ({})",
            filter.to_sql(&mut params)
        );

        let total: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM documents d WHERE {where_clause}"),
                params_from_iter(params.iter()),
                |row| row.get(0),
            )
            .map_err(DatabaseError::Query)?;

        params.push(Value::Integer(i64::from(page.limit)));
        params.push(Value::Integer(page.offset() as i64));

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents d WHERE {where_clause} \
                 ORDER BY d.created_at DESC, d.id DESC LIMIT ? OFFSET ?"
            ))
            .map_err(DatabaseError::Query)?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), Document::from_row)
            .map_err(DatabaseError::Query)?;

        let mut docs = Vec::new();
        for row in rows {
            docs.push(row.map_err(DatabaseError::Query)?);
        }

        Ok((docs, total.max(0) as u64))
    }

    /// Apply allow-listed metadata changes to a live document.
    /// Returns false when the row is missing or already soft-deleted.
    pub fn update_document(&self, document_id: &str, patch: &DocumentPatch) -> ServiceResult<bool> {
        let conn = self.conn()?;

        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(document_type) = patch.document_type {
            sets.push("document_type = ?");
            values.push(Value::Text(document_type.to_string()));
        }
        if let Some(access_level) = patch.access_level {
            sets.push("access_level = ?");
            values.push(Value::Text(access_level.to_string()));
        }
        if let Some(version) = &patch.version {
            sets.push("version = ?");
            values.push(Value::Text(version.clone()));
        }
        if let Some(category) = &patch.category {
            sets.push("category = ?");
            values.push(Value::Text(category.clone()));
        }
        if let Some(tags) = &patch.tags {
            sets.push("tags = ?");
            values.push(Value::Text(tags_json(tags)?));
        }
        if let Some(description) = &patch.description {
            sets.push("description = ?");
            values.push(Value::Text(description.clone()));
        }
        sets.push("updated_at = ?");
        values.push(Value::Text(timestamp(Utc::now())));
        values.push(Value::Text(document_id.to_string()));

        let rows = conn
            .execute(
                &format!(
                    "UPDATE documents SET {} WHERE id = ? AND deleted_at IS NULL",
                    sets.join(", ")
                ),
                params_from_iter(values.iter()),
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Record a completed upload and queue the document for embedding.
    ///
    /// Embedding rows from an earlier payload are cleared in the same
    /// transaction.
    pub fn attach_payload(
        &self,
        document_id: &str,
        payload: &AttachedPayload,
    ) -> ServiceResult<AttachOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        let previous: Option<Option<String>> = tx
            .query_row(
                "SELECT storage_path FROM documents WHERE id = ?1 AND deleted_at IS NULL",
                params![document_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(DatabaseError::Query)?;

        let Some(previous_path) = previous else {
            return Ok(AttachOutcome::Deleted);
        };

        tx.execute(
            "UPDATE documents SET storage_path = ?1, file_size = ?2, content_hash = ?3, \
             embedding_status = ?4, embedding_error = NULL, total_chunks = NULL, updated_at = ?5 \
             WHERE id = ?6 AND deleted_at IS NULL",
            params![
                payload.storage_path,
                payload.file_size as i64,
                payload.content_hash,
                EmbeddingStatus::Pending.to_string(),
                timestamp(Utc::now()),
                document_id,
            ],
        )
        .map_err(DatabaseError::Query)?;

        tx.execute(
            "DELETE FROM document_embeddings WHERE document_id = ?1",
            params![document_id],
        )
        .map_err(DatabaseError::Query)?;

        tx.commit().map_err(DatabaseError::Query)?;

        Ok(AttachOutcome::Attached { previous_path })
    }

    /// Mark a document deleted and hard-delete its embedding rows.
    /// Returns `None` if the row is missing or was already deleted.
    pub fn soft_delete_document(&self, document_id: &str) -> ServiceResult<Option<SoftDeleteOutcome>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        let storage_path: Option<Option<String>> = tx
            .query_row(
                "UPDATE documents SET deleted_at = ?1, updated_at = ?1 \
                 WHERE id = ?2 AND deleted_at IS NULL RETURNING storage_path",
                params![timestamp(Utc::now()), document_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(DatabaseError::Query)?;

        let Some(storage_path) = storage_path else {
            return Ok(None);
        };

        let embeddings_removed = tx
            .execute(
                "DELETE FROM document_embeddings WHERE document_id = ?1",
                params![document_id],
            )
            .map_err(DatabaseError::Query)?;

        tx.commit().map_err(DatabaseError::Query)?;

        Ok(Some(SoftDeleteOutcome {
            storage_path,
            embeddings_removed,
        }))
    }

    /// Atomically bump a counter on a live document and return its new value
    pub fn increment_counter(&self, document_id: &str, counter: Counter) -> ServiceResult<Option<u64>> {
        let conn = self.conn()?;
        let column = counter.column();

        let value: Option<i64> = conn
            .query_row(
                &format!(
                    "UPDATE documents SET {column} = {column} + 1 \
                     WHERE id = ?1 AND deleted_at IS NULL RETURNING {column}"
                ),
                params![document_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(DatabaseError::Query)?;

        Ok(value.map(|v| v.max(0) as u64))
    }

    /// Move a live document's embedding status, but only from one of `from`
    /// and only while its payload still has `content_hash`.
    pub fn transition_embedding_status(
        &self,
        document_id: &str,
        content_hash: &str,
        from: &[EmbeddingStatus],
        to: EmbeddingStatus,
        error: Option<&str>,
    ) -> ServiceResult<bool> {
        if from.is_empty() {
            return Ok(false);
        }
        let conn = self.conn()?;

        let placeholders = vec!["?"; from.len()].join(", ");
        let mut values: Vec<Value> = vec![
            Value::Text(to.to_string()),
            error.map_or(Value::Null, |e| Value::Text(e.to_string())),
            Value::Text(timestamp(Utc::now())),
            Value::Text(document_id.to_string()),
            Value::Text(content_hash.to_string()),
        ];
        values.extend(from.iter().map(|s| Value::Text(s.to_string())));

        let rows = conn
            .execute(
                &format!(
                    "UPDATE documents SET embedding_status = ?, embedding_error = ?, updated_at = ? \
                     WHERE id = ? AND deleted_at IS NULL AND storage_path IS NOT NULL \
                     AND content_hash = ? AND embedding_status IN ({placeholders})"
                ),
                params_from_iter(values.iter()),
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Put a live, uploaded document back to `pending` and drop its embeddings
    pub fn reset_embedding(&self, document_id: &str) -> ServiceResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        let rows = tx
            .execute(
                "UPDATE documents SET embedding_status = ?1, embedding_error = NULL, total_chunks = NULL, updated_at = ?2 \
                 WHERE id = ?3 AND deleted_at IS NULL AND storage_path IS NOT NULL",
                params![
                    EmbeddingStatus::Pending.to_string(),
                    timestamp(Utc::now()),
                    document_id
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

        tx.commit().map_err(DatabaseError::Query)?;
        Ok(true)
    }

    /// IDs of live documents in the given embedding status, oldest first
    pub fn documents_with_embedding_status(
        &self,
        status: EmbeddingStatus,
    ) -> ServiceResult<Vec<String>> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(
                "SELECT id FROM documents WHERE embedding_status = ?1 AND deleted_at IS NULL \
                 ORDER BY created_at ASC",
            )
            .map_err(DatabaseError::Query)?;
        let rows = stmt
            .query_map(params![status.to_string()], |row| row.get(0))
            .map_err(DatabaseError::Query)?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row.map_err(DatabaseError::Query)?);
        }
        Ok(ids)
    }
}
