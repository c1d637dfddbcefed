//! Document lifecycle: register, upload, update, delete, fetch, download
//! and listing.

use bytes::Bytes;
use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::{DocVaultService, with_storage_retry};
use crate::access::visibility::{search_filter, type_filter};
use crate::access::{Operation, Principal, authorize, authorize_document_type, build_filter};
use crate::db::{
    AttachOutcome, AttachedPayload, Counter, Document, DocumentPatch, DocumentType, NewDocument,
    Page,
};
use crate::embedding::EmbeddingJob;
use crate::error::{ServiceError, ServiceResult, StorageError};
use crate::storage::hash::compute_content_hash;
use crate::storage::path::allocate;

const PDF_CONTENT_TYPE: &str = "application/pdf";
const DEFAULT_VERSION: &str = "v1.0";

/// A payload received from the client
#[derive(Debug, Clone)]
pub struct PayloadUpload {
    pub bytes: Bytes,
    pub content_type: Option<String>,
    /// File name supplied with the upload; falls back to the registered name
    pub declared_name: Option<String>,
}

/// Payload bytes read back for a download
#[derive(Debug, Clone)]
pub struct DownloadedPayload {
    pub document: Document,
    pub bytes: Bytes,
}

/// Listing parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
    #[serde(rename = "type")]
    pub document_type: Option<DocumentType>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentPage {
    pub documents: Vec<Document>,
    pub pagination: Pagination,
}

fn required(field: &str, value: &str) -> ServiceResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ServiceError::validation(format!("{field} is required")));
    }
    Ok(value.to_string())
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

fn is_pdf(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.parse::<mime::Mime>().ok())
        .is_some_and(|m| m.essence_str() == PDF_CONTENT_TYPE)
}

impl DocVaultService {
    /// Load a document that has not been soft-deleted
    pub(crate) fn live_document(&self, document_id: &str) -> ServiceResult<Document> {
        match self.db.get_document(document_id)? {
            Some(doc) if !doc.is_deleted() => Ok(doc),
            _ => Err(ServiceError::not_found(document_id)),
        }
    }

    /// Create a metadata record. The payload is attached separately.
    pub fn register(&self, principal: &Principal, new: NewDocument) -> ServiceResult<Document> {
        let file_name = required("fileName", &new.file_name)?;
        let original_file_name = required("originalFileName", &new.original_file_name)?;
        let department = optional(new.department);
        if new.document_type == DocumentType::Dept && department.is_none() {
            return Err(ServiceError::validation(
                "department is required for department documents",
            ));
        }
        authorize_document_type(principal, new.document_type)?;

        let now = Utc::now();
        let document = Document {
            id: uuid::Uuid::new_v4().to_string(),
            file_name,
            original_file_name,
            document_type: new.document_type,
            department,
            access_level: new
                .access_level
                .unwrap_or_else(|| new.document_type.default_access_level()),
            owner_id: principal.id.clone(),
            creator_name: optional(new.creator_name),
            storage_path: None,
            file_size: None,
            content_hash: None,
            version: optional(new.version).unwrap_or_else(|| DEFAULT_VERSION.to_string()),
            category: optional(new.category),
            tags: normalize_tags(new.tags),
            description: new.description,
            view_count: 0,
            download_count: 0,
            embedding_status: None,
            embedding_error: None,
            total_chunks: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        self.db.insert_document(&document)?;
        counter!("docvault_documents_registered_total").increment(1);

        info!(
            doc_id = %document.id,
            owner = %document.owner_id,
            document_type = %document.document_type,
            "Document registered"
        );

        Ok(document)
    }

    /// Store a PDF payload for a document and queue it for embedding.
    ///
    /// Only the registering principal may upload. The metadata row is written
    /// only after the object write succeeds.
    pub async fn attach_payload(
        &self,
        principal: &Principal,
        document_id: &str,
        upload: PayloadUpload,
    ) -> ServiceResult<Document> {
        if !is_pdf(upload.content_type.as_deref()) {
            return Err(ServiceError::validation("only PDF payloads are accepted"));
        }
        let max = self.config.limits.max_payload_bytes;
        if upload.bytes.len() as u64 > max {
            return Err(ServiceError::validation(format!(
                "payload of {} bytes exceeds the {max} byte limit",
                upload.bytes.len()
            )));
        }
        if upload.bytes.is_empty() {
            return Err(ServiceError::validation("payload is empty"));
        }

        let document = self.live_document(document_id)?;
        authorize(principal, &document, Operation::Read)?;
        if document.owner_id != principal.id {
            return Err(ServiceError::permission_denied(
                "only the document owner may upload its payload",
            ));
        }

        self.commit_payload(&document, upload).await
    }

    /// Write the object and then the metadata, compensating on failure.
    pub(super) async fn commit_payload(
        &self,
        document: &Document,
        upload: PayloadUpload,
    ) -> ServiceResult<Document> {
        let file_name = optional(upload.declared_name).unwrap_or_else(|| document.file_name.clone());
        let key = allocate(&document.owner_id, &document.id, &file_name);
        let payload = AttachedPayload {
            storage_path: key.clone(),
            file_size: upload.bytes.len() as u64,
            content_hash: compute_content_hash(&upload.bytes),
        };
        // The key already backs the live payload when a re-upload reuses it
        let key_in_use = document.storage_path.as_deref() == Some(key.as_str());

        let bytes = upload.bytes;
        if let Err(e) = with_storage_retry(&key, || self.store.put(&key, bytes.clone())).await {
            counter!("docvault_storage_failures_total").increment(1);
            error!(doc_id = %document.id, key = %key, error = %e, "Payload write failed");
            if !key_in_use {
                self.discard_object(&key).await;
            }
            return Err(e.into());
        }

        let outcome = match self.db.attach_payload(&document.id, &payload) {
            Ok(outcome) => outcome,
            Err(e) => {
                if !key_in_use {
                    self.discard_object(&key).await;
                }
                return Err(e);
            }
        };

        match outcome {
            AttachOutcome::Deleted => {
                warn!(doc_id = %document.id, "Document deleted during upload; discarding payload");
                self.discard_object(&key).await;
                Err(ServiceError::ConflictOnDelete {
                    document_id: document.id.clone(),
                })
            }
            AttachOutcome::Attached { previous_path } => {
                if let Some(previous) = previous_path.filter(|p| *p != key) {
                    self.discard_object(&previous).await;
                }
                counter!("docvault_payload_uploads_total").increment(1);
                info!(
                    doc_id = %document.id,
                    key = %key,
                    size = payload.file_size,
                    "Payload attached, embedding pending"
                );

                self.start_embedding_trigger(EmbeddingJob {
                    document_id: document.id.clone(),
                    storage_path: payload.storage_path,
                    content_hash: payload.content_hash,
                });

                self.db
                    .get_document(&document.id)?
                    .ok_or_else(|| ServiceError::not_found(&document.id))
            }
        }
    }

    /// Best-effort object removal; failures leave an unreferenced object.
    pub(super) async fn discard_object(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            counter!("docvault_storage_failures_total").increment(1);
            warn!(key = %key, error = %e, "Failed to delete storage object");
        }
    }

    /// Apply allow-listed metadata changes
    pub fn update(
        &self,
        principal: &Principal,
        document_id: &str,
        mut patch: DocumentPatch,
    ) -> ServiceResult<Document> {
        if patch.is_empty() {
            return Err(ServiceError::validation("no updatable fields supplied"));
        }

        let document = self.live_document(document_id)?;
        authorize(principal, &document, Operation::Write)?;

        if let Some(document_type) = patch.document_type {
            authorize_document_type(principal, document_type)?;
            if document_type == DocumentType::Dept && document.department.is_none() {
                return Err(ServiceError::validation(
                    "document has no department to scope it to",
                ));
            }
            if document_type != document.document_type && patch.access_level.is_none() {
                patch.access_level = Some(document_type.default_access_level());
            }
        }
        patch.version = optional(patch.version);
        patch.category = optional(patch.category);
        patch.tags = patch.tags.map(normalize_tags);

        if !self.db.update_document(document_id, &patch)? {
            return Err(ServiceError::ConflictOnDelete {
                document_id: document_id.to_string(),
            });
        }

        debug!(doc_id = %document_id, principal = %principal.id, "Document updated");

        self.db
            .get_document(document_id)?
            .ok_or_else(|| ServiceError::not_found(document_id))
    }

    /// Mark a document deleted, drop its embeddings and remove its payload.
    pub async fn soft_delete(&self, principal: &Principal, document_id: &str) -> ServiceResult<()> {
        let document = self.live_document(document_id)?;
        authorize(principal, &document, Operation::Delete)?;

        let outcome = self
            .db
            .soft_delete_document(document_id)?
            .ok_or_else(|| ServiceError::not_found(document_id))?;

        if let Some(key) = &outcome.storage_path {
            self.discard_object(key).await;
        }
        counter!("docvault_soft_deletes_total").increment(1);

        info!(
            doc_id = %document_id,
            principal = %principal.id,
            embeddings_removed = outcome.embeddings_removed,
            "Document soft-deleted"
        );
        Ok(())
    }

    /// Read one document, counting the view
    pub fn fetch(&self, principal: &Principal, document_id: &str) -> ServiceResult<Document> {
        let mut document = self.live_document(document_id)?;
        authorize(principal, &document, Operation::Read)?;

        document.view_count = self.increment(document_id, Counter::View)?;
        Ok(document)
    }

    /// Read a document's payload. The download is counted only once the
    /// bytes are in hand.
    pub async fn download(
        &self,
        principal: &Principal,
        document_id: &str,
    ) -> ServiceResult<DownloadedPayload> {
        let mut document = self.live_document(document_id)?;
        authorize(principal, &document, Operation::Download)?;

        let mut key = document
            .storage_path
            .clone()
            .ok_or_else(|| ServiceError::PayloadNotReady {
                document_id: document_id.to_string(),
            })?;

        let mut relocated = false;
        let bytes = loop {
            let err = match with_storage_retry(&key, || self.store.get(&key)).await {
                Ok(bytes) => break bytes,
                Err(e) => e,
            };

            // The object may have gone because the row was deleted or
            // re-uploaded after it was read
            if matches!(err, StorageError::ObjectNotFound { .. }) {
                let current = self.live_document(document_id)?;
                authorize(principal, &current, Operation::Download)?;
                if let Some(path) = current.storage_path.clone()
                    && path != key
                    && !relocated
                {
                    debug!(doc_id = %document_id, from = %key, to = %path, "Payload moved, re-reading");
                    relocated = true;
                    key = path;
                    document = current;
                    continue;
                }
            }

            counter!("docvault_storage_failures_total").increment(1);
            error!(doc_id = %document_id, key = %key, error = %err, "Payload read failed");
            return Err(err.into());
        };

        document.download_count = self.increment(document_id, Counter::Download)?;
        counter!("docvault_downloads_total").increment(1);

        Ok(DownloadedPayload { document, bytes })
    }

    /// List documents visible to `principal`, newest first
    pub fn list(&self, principal: &Principal, query: ListQuery) -> ServiceResult<DocumentPage> {
        let listing = &self.config.listing;
        let page = query.page.unwrap_or(1).max(1);
        let limit = query
            .limit
            .unwrap_or(listing.default_page_size)
            .clamp(1, listing.max_page_size.max(1));

        let filter = build_filter(principal)
            .and(type_filter(query.document_type))
            .and(search_filter(query.search.as_deref().unwrap_or("")));

        let (documents, total) = self.db.list_documents(&filter, Page { page, limit })?;

        Ok(DocumentPage {
            documents,
            pagination: Pagination {
                page,
                limit,
                total,
                pages: total.div_ceil(u64::from(limit)),
            },
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::access::Role;
    use crate::config::StaticConfig;
    use crate::db::{AccessLevel, Database, EmbeddingChunk, EmbeddingStatus};
    use crate::service::tests::{admin, harness, user};
    use crate::storage::{MemoryObjectStore, ObjectStore};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    pub(crate) fn dept_doc(name: &str, dept: &str) -> NewDocument {
        NewDocument {
            file_name: name.to_string(),
            original_file_name: name.to_string(),
            document_type: DocumentType::Dept,
            department: Some(dept.to_string()),
            access_level: None,
            version: None,
            category: None,
            tags: vec![],
            description: None,
            creator_name: None,
        }
    }

    pub(crate) fn pdf(bytes: &'static [u8]) -> PayloadUpload {
        PayloadUpload {
            bytes: Bytes::from_static(bytes),
            content_type: Some("application/pdf".to_string()),
            declared_name: None,
        }
    }

    #[test]
    fn test_register_applies_defaults() {
        let h = harness();
        let u1 = user("u1", Some("Eng"));
        let mut new = dept_doc("plan.pdf", "Eng");
        new.tags = vec![" q1 ".to_string(), "".to_string(), "q1".to_string()];
        let doc = h.service.register(&u1, new).unwrap();

        assert_eq!(doc.owner_id, "u1");
        assert_eq!(doc.version, "v1.0");
        assert_eq!(doc.access_level, AccessLevel::Restricted);
        assert_eq!(doc.tags, vec!["q1"]);
        assert!(doc.storage_path.is_none());
        assert!(doc.embedding_status.is_none());
    }

    #[test]
    fn test_register_validates_before_permission() {
        let h = harness();
        let u1 = user("u1", Some("Eng"));

        let mut missing_dept = dept_doc("a.pdf", "Eng");
        missing_dept.department = Some("  ".to_string());
        assert!(matches!(
            h.service.register(&u1, missing_dept),
            Err(ServiceError::Validation { .. })
        ));

        let mut missing_name = dept_doc("", "Eng");
        missing_name.document_type = DocumentType::Common;
        assert!(matches!(
            h.service.register(&u1, missing_name),
            Err(ServiceError::Validation { .. })
        ));
    }

    #[test]
    fn test_register_common_requires_admin() {
        let h = harness();
        let mut new = dept_doc("policy.pdf", "Eng");
        new.document_type = DocumentType::Common;

        assert!(matches!(
            h.service.register(&user("u1", Some("Eng")), new.clone()),
            Err(ServiceError::PermissionDenied { .. })
        ));
        let doc = h.service.register(&admin("u4"), new).unwrap();
        assert_eq!(doc.access_level, AccessLevel::Public);
    }

    #[tokio::test]
    async fn test_register_attach_fetch_round_trip() {
        let h = harness();
        let u1 = user("u1", Some("Eng"));
        let doc = h.service.register(&u1, dept_doc("plan.pdf", "Eng")).unwrap();

        let attached = h
            .service
            .attach_payload(&u1, &doc.id, pdf(b"%PDF-1"))
            .await
            .unwrap();
        let key = format!("u1/{}/plan.pdf", doc.id);
        assert_eq!(attached.storage_path.as_deref(), Some(key.as_str()));
        assert!(h.store.contains(&key));

        let fetched = h.service.fetch(&u1, &doc.id).unwrap();
        assert!(fetched.storage_path.is_some());
        assert_eq!(fetched.embedding_status, Some(EmbeddingStatus::Pending));
        assert_eq!(fetched.file_size, Some(6));
        assert_eq!(fetched.content_hash.as_deref().map(str::len), Some(64));
    }

    #[tokio::test]
    async fn test_attach_rejects_non_pdf_and_oversize_before_writing() {
        let mut config = crate::config::StaticConfig::default();
        config.limits.max_payload_bytes = 4;
        let h = crate::service::tests::harness_with(config);
        let u1 = user("u1", Some("Eng"));
        let doc = h.service.register(&u1, dept_doc("a.pdf", "Eng")).unwrap();

        let mut text = pdf(b"%PDF");
        text.content_type = Some("text/plain".to_string());
        assert!(matches!(
            h.service.attach_payload(&u1, &doc.id, text).await,
            Err(ServiceError::Validation { .. })
        ));
        assert!(matches!(
            h.service.attach_payload(&u1, &doc.id, pdf(b"%PDF-1.7")).await,
            Err(ServiceError::Validation { .. })
        ));
        assert_eq!(h.store.len(), 0);

        let mut with_params = pdf(b"%PDF");
        with_params.content_type = Some("application/pdf; charset=binary".to_string());
        assert!(h.service.attach_payload(&u1, &doc.id, with_params).await.is_ok());
    }

    #[tokio::test]
    async fn test_attach_requires_owner() {
        let h = harness();
        let u1 = user("u1", Some("Eng"));
        let doc = h.service.register(&u1, dept_doc("a.pdf", "Eng")).unwrap();

        assert!(matches!(
            h.service
                .attach_payload(&user("u2", Some("Eng")), &doc.id, pdf(b"%PDF"))
                .await,
            Err(ServiceError::PermissionDenied { .. })
        ));
        assert!(matches!(
            h.service
                .attach_payload(&user("u3", Some("Sales")), &doc.id, pdf(b"%PDF"))
                .await,
            Err(ServiceError::NotFound { .. })
        ));
        assert!(matches!(
            h.service.attach_payload(&admin("u4"), &doc.id, pdf(b"%PDF")).await,
            Err(ServiceError::PermissionDenied { .. })
        ));
        assert_eq!(h.store.len(), 0);
    }

    #[tokio::test]
    async fn test_storage_failure_leaves_metadata_untouched() {
        let h = harness();
        let u1 = user("u1", Some("Eng"));
        let doc = h.service.register(&u1, dept_doc("a.pdf", "Eng")).unwrap();

        h.store.fail_writes(true);
        assert!(matches!(
            h.service.attach_payload(&u1, &doc.id, pdf(b"%PDF")).await,
            Err(ServiceError::Storage(_))
        ));
        let stored = h.db_doc(&doc.id);
        assert!(stored.storage_path.is_none());
        assert!(stored.embedding_status.is_none());
        assert_eq!(h.store.len(), 0);
    }

    #[tokio::test]
    async fn test_upload_losing_race_with_delete_discards_object() {
        let h = harness();
        let u1 = user("u1", Some("Eng"));
        let doc = h.service.register(&u1, dept_doc("a.pdf", "Eng")).unwrap();

        // Delete lands between the permission check and the metadata write
        let stale = h.service.live_document(&doc.id).unwrap();
        h.service.soft_delete(&u1, &doc.id).await.unwrap();

        let result = h.service.commit_payload(&stale, pdf(b"%PDF")).await;
        assert!(matches!(result, Err(ServiceError::ConflictOnDelete { .. })));
        assert_eq!(h.store.len(), 0);
        assert!(h.db_doc(&doc.id).storage_path.is_none());
    }

    #[tokio::test]
    async fn test_reupload_under_new_name_removes_previous_object() {
        let h = harness();
        let u1 = user("u1", Some("Eng"));
        let doc = h.service.register(&u1, dept_doc("a.pdf", "Eng")).unwrap();

        let attached = h.service.attach_payload(&u1, &doc.id, pdf(b"%PDF-1")).await.unwrap();
        h.service
            .db
            .complete_embedding(
                &doc.id,
                attached.content_hash.as_deref().unwrap(),
                &[EmbeddingChunk {
                    chunk_index: 0,
                    chunk_text: "t".to_string(),
                    embedding: vec![0.0],
                }],
            )
            .unwrap();

        let mut renamed = pdf(b"%PDF-2");
        renamed.declared_name = Some("b.pdf".to_string());
        let doc2 = h.service.attach_payload(&u1, &doc.id, renamed).await.unwrap();

        assert_eq!(h.store.len(), 1);
        assert!(h.store.contains(&format!("u1/{}/b.pdf", doc.id)));
        assert_eq!(doc2.embedding_status, Some(EmbeddingStatus::Pending));
        assert_eq!(h.service.db.count_embeddings(&doc.id).unwrap(), 0);

        // Same key overwrites in place
        h.service.attach_payload(&u1, &doc.id, pdf(b"%PDF-3")).await.unwrap();
        let key = format!("u1/{}/a.pdf", doc.id);
        assert_eq!(h.store.len(), 1);
        assert!(h.store.contains(&key));
    }

    #[test]
    fn test_retype_to_common_requires_admin_and_leaves_type() {
        let h = harness();
        let u1 = user("u1", Some("Eng"));
        let doc = h.service.register(&u1, dept_doc("a.pdf", "Eng")).unwrap();

        let retype = DocumentPatch {
            document_type: Some(DocumentType::Common),
            ..Default::default()
        };
        assert!(matches!(
            h.service.update(&u1, &doc.id, retype.clone()),
            Err(ServiceError::PermissionDenied { .. })
        ));
        assert_eq!(h.db_doc(&doc.id).document_type, DocumentType::Dept);

        let updated = h.service.update(&admin("u4"), &doc.id, retype).unwrap();
        assert_eq!(updated.document_type, DocumentType::Common);
        assert_eq!(updated.access_level, AccessLevel::Public);
        assert_eq!(updated.owner_id, "u1");
    }

    #[test]
    fn test_update_rejects_empty_patch() {
        let h = harness();
        let u1 = user("u1", Some("Eng"));
        let doc = h.service.register(&u1, dept_doc("a.pdf", "Eng")).unwrap();
        assert!(matches!(
            h.service.update(&u1, &doc.id, DocumentPatch::default()),
            Err(ServiceError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_scenario_department_colleague_outsider_admin() {
        let h = harness();
        let u1 = user("u1", Some("Eng"));
        let u2 = user("u2", Some("Eng"));
        let u3 = user("u3", Some("Sales"));
        let u4 = Principal::new("u4", None, Role::Admin);
        let doc = h.service.register(&u1, dept_doc("eng.pdf", "Eng")).unwrap();
        let patch = || DocumentPatch {
            description: Some("x".to_string()),
            ..Default::default()
        };

        assert!(h.service.fetch(&u2, &doc.id).is_ok());
        assert!(matches!(
            h.service.update(&u2, &doc.id, patch()),
            Err(ServiceError::PermissionDenied { .. })
        ));

        assert!(matches!(
            h.service.fetch(&u3, &doc.id),
            Err(ServiceError::NotFound { .. })
        ));
        assert!(matches!(
            h.service.update(&u3, &doc.id, patch()),
            Err(ServiceError::NotFound { .. })
        ));

        assert!(h.service.fetch(&u4, &doc.id).is_ok());
        assert!(h.service.update(&u4, &doc.id, patch()).is_ok());
        h.service.soft_delete(&u4, &doc.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_soft_delete_hides_document_and_removes_embeddings() {
        let h = harness();
        let u1 = user("u1", Some("Eng"));
        let doc = h.service.register(&u1, dept_doc("a.pdf", "Eng")).unwrap();
        let attached = h.service.attach_payload(&u1, &doc.id, pdf(b"%PDF")).await.unwrap();
        h.service
            .db
            .complete_embedding(
                &doc.id,
                attached.content_hash.as_deref().unwrap(),
                &[EmbeddingChunk {
                    chunk_index: 0,
                    chunk_text: "t".to_string(),
                    embedding: vec![0.5],
                }],
            )
            .unwrap();

        h.service.soft_delete(&u1, &doc.id).await.unwrap();

        for p in [&u1, &user("u2", Some("Eng")), &admin("u4")] {
            assert!(matches!(
                h.service.fetch(p, &doc.id),
                Err(ServiceError::NotFound { .. })
            ));
        }
        assert_eq!(h.service.db.count_embeddings(&doc.id).unwrap(), 0);
        assert_eq!(h.store.len(), 0);
        assert!(matches!(
            h.service.soft_delete(&u1, &doc.id).await,
            Err(ServiceError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_soft_delete_survives_storage_delete_failure() {
        let h = harness();
        let u1 = user("u1", Some("Eng"));
        let doc = h.service.register(&u1, dept_doc("a.pdf", "Eng")).unwrap();
        h.service.attach_payload(&u1, &doc.id, pdf(b"%PDF")).await.unwrap();

        h.store.fail_deletes(true);
        h.service.soft_delete(&u1, &doc.id).await.unwrap();
        assert!(h.db_doc(&doc.id).is_deleted());
        assert_eq!(h.store.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_update_and_delete_resolve_to_one_outcome() {
        for _ in 0..20 {
            let h = harness();
            let u1 = user("u1", Some("Eng"));
            let doc = h.service.register(&u1, dept_doc("a.pdf", "Eng")).unwrap();

            let updater = {
                let service = h.service.clone();
                let (u1, id) = (u1.clone(), doc.id.clone());
                tokio::spawn(async move {
                    let patch = DocumentPatch {
                        description: Some("x".to_string()),
                        ..Default::default()
                    };
                    service.update(&u1, &id, patch)
                })
            };
            let deleter = {
                let service = h.service.clone();
                let (u1, id) = (u1.clone(), doc.id.clone());
                tokio::spawn(async move { service.soft_delete(&u1, &id).await })
            };
            let (updated, deleted) = (updater.await.unwrap(), deleter.await.unwrap());
            deleted.unwrap();

            let stored = h.db_doc(&doc.id);
            assert!(stored.is_deleted());
            match updated {
                Ok(_) => assert_eq!(stored.description.as_deref(), Some("x")),
                Err(e) => {
                    assert!(matches!(
                        e,
                        ServiceError::NotFound { .. } | ServiceError::ConflictOnDelete { .. }
                    ));
                    assert!(stored.description.is_none());
                }
            }
            assert_eq!(h.service.db.count_embeddings(&doc.id).unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn test_download_counts_only_successful_reads() {
        let h = harness();
        let u1 = user("u1", Some("Eng"));
        let doc = h.service.register(&u1, dept_doc("a.pdf", "Eng")).unwrap();

        assert!(matches!(
            h.service.download(&u1, &doc.id).await,
            Err(ServiceError::PayloadNotReady { .. })
        ));

        h.service.attach_payload(&u1, &doc.id, pdf(b"%PDF-1")).await.unwrap();
        h.store.fail_reads(true);
        assert!(matches!(
            h.service.download(&u1, &doc.id).await,
            Err(ServiceError::Storage(_))
        ));
        assert_eq!(h.db_doc(&doc.id).download_count, 0);

        h.store.fail_reads(false);
        let payload = h.service.download(&u1, &doc.id).await.unwrap();
        assert_eq!(&payload.bytes[..], b"%PDF-1");
        assert_eq!(payload.document.download_count, 1);
        assert_eq!(h.db_doc(&doc.id).download_count, 1);
    }

    #[tokio::test]
    async fn test_download_of_deleted_document_is_not_found() {
        let h = harness();
        let u1 = user("u1", Some("Eng"));
        let doc = h.service.register(&u1, dept_doc("a.pdf", "Eng")).unwrap();
        h.service.attach_payload(&u1, &doc.id, pdf(b"%PDF-1")).await.unwrap();
        h.service.soft_delete(&u1, &doc.id).await.unwrap();

        for principal in [u1, admin("u4")] {
            assert!(matches!(
                h.service.download(&principal, &doc.id).await,
                Err(ServiceError::NotFound { .. })
            ));
        }
        assert_eq!(h.db_doc(&doc.id).download_count, 0);
    }

    enum Race {
        Delete,
        Reupload(AttachedPayload, &'static [u8]),
    }

    /// Object store that lets one concurrent change land just before a read
    struct RacingStore {
        inner: MemoryObjectStore,
        db: Arc<Database>,
        race: Mutex<Option<Race>>,
    }

    #[async_trait]
    impl ObjectStore for RacingStore {
        async fn put(&self, key: &str, data: Bytes) -> Result<(), StorageError> {
            self.inner.put(key, data).await
        }

        async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
            let race = self.race.lock().unwrap().take();
            if let Some(race) = race {
                let doc_id = key.split('/').nth(1).unwrap();
                match race {
                    Race::Delete => {
                        self.db.soft_delete_document(doc_id).unwrap();
                    }
                    Race::Reupload(payload, bytes) => {
                        self.inner
                            .put(&payload.storage_path, Bytes::from_static(bytes))
                            .await?;
                        self.db.attach_payload(doc_id, &payload).unwrap();
                    }
                }
                self.inner.delete(key).await?;
            }
            self.inner.get(key).await
        }

        async fn delete(&self, key: &str) -> Result<(), StorageError> {
            self.inner.delete(key).await
        }
    }

    fn racing_service() -> (DocVaultService, Arc<RacingStore>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = Arc::new(RacingStore {
            inner: MemoryObjectStore::new(),
            db: db.clone(),
            race: Mutex::new(None),
        });
        let service = DocVaultService::new(
            Arc::new(StaticConfig::default()),
            db,
            store.clone() as Arc<dyn ObjectStore>,
        )
        .unwrap();
        (service, store)
    }

    #[tokio::test]
    async fn test_download_racing_delete_is_not_found() {
        let (service, store) = racing_service();
        let u1 = user("u1", Some("Eng"));
        let doc = service.register(&u1, dept_doc("a.pdf", "Eng")).unwrap();
        service.attach_payload(&u1, &doc.id, pdf(b"%PDF-1")).await.unwrap();

        *store.race.lock().unwrap() = Some(Race::Delete);
        assert!(matches!(
            service.download(&u1, &doc.id).await,
            Err(ServiceError::NotFound { .. })
        ));
        assert_eq!(
            service.db.get_document(&doc.id).unwrap().unwrap().download_count,
            0
        );
    }

    #[tokio::test]
    async fn test_download_racing_reupload_reads_new_payload() {
        let (service, store) = racing_service();
        let u1 = user("u1", Some("Eng"));
        let doc = service.register(&u1, dept_doc("a.pdf", "Eng")).unwrap();
        service.attach_payload(&u1, &doc.id, pdf(b"%PDF-1")).await.unwrap();

        let new_key = allocate("u1", &doc.id, "b.pdf");
        let replacement = AttachedPayload {
            storage_path: new_key.clone(),
            file_size: 6,
            content_hash: compute_content_hash(b"%PDF-2"),
        };
        *store.race.lock().unwrap() = Some(Race::Reupload(replacement, b"%PDF-2"));

        let payload = service.download(&u1, &doc.id).await.unwrap();
        assert_eq!(&payload.bytes[..], b"%PDF-2");
        assert_eq!(payload.document.storage_path.as_deref(), Some(new_key.as_str()));
        assert_eq!(payload.document.download_count, 1);
    }

    #[tokio::test]
    async fn test_list_pages_filters_and_searches() {
        let h = harness();
        let u1 = user("u1", Some("Eng"));
        let u3 = user("u3", Some("Sales"));
        for i in 0..3 {
            h.service
                .register(&u1, dept_doc(&format!("eng-{i}.pdf"), "Eng"))
                .unwrap();
        }
        let mut tagged = dept_doc("sales.pdf", "Sales");
        tagged.tags = vec!["Budget".to_string()];
        h.service.register(&u3, tagged).unwrap();
        let mut common = dept_doc("policy.pdf", "Eng");
        common.document_type = DocumentType::Common;
        h.service.register(&admin("u4"), common).unwrap();

        let page = h
            .service
            .list(
                &u1,
                ListQuery {
                    limit: Some(2),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(page.pagination.total, 4);
        assert_eq!(page.pagination.pages, 2);
        assert_eq!(page.documents.len(), 2);

        let searched = h
            .service
            .list(
                &u3,
                ListQuery {
                    search: Some("budget".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(searched.documents.len(), 1);
        assert_eq!(searched.documents[0].file_name, "sales.pdf");

        let common_only = h
            .service
            .list(
                &u3,
                ListQuery {
                    document_type: Some(DocumentType::Common),
                    limit: Some(1000),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(common_only.pagination.limit, 100);
        assert_eq!(common_only.documents.len(), 1);
    }

    #[tokio::test]
    async fn test_list_excludes_deleted_documents() {
        let h = harness();
        let u1 = user("u1", Some("Eng"));
        let doc = h.service.register(&u1, dept_doc("a.pdf", "Eng")).unwrap();
        h.service.soft_delete(&u1, &doc.id).await.unwrap();

        let page = h.service.list(&admin("u4"), ListQuery::default()).unwrap();
        assert!(page.documents.is_empty());
        assert_eq!(page.pagination.pages, 0);
    }
}
