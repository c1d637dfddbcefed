//! Document API endpoints.

use axum::{
    Json,
    body::Body,
    extract::{
        Multipart, Path, Query, State,
        multipart::MultipartRejection,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::access::Principal;
use crate::db::{AccessLevel, Document, DocumentPatch, DocumentType, NewDocument};
use crate::error::{ServiceError, ServiceResult};
use crate::service::{DocumentPage, ListQuery, PayloadUpload};

use super::AppState;

/// Request to register document metadata
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDocumentRequest {
    pub file_name: String,
    pub original_file_name: String,
    pub document_type: DocumentType,
    pub department: Option<String>,
    pub access_level: Option<AccessLevel>,
    pub version: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub description: Option<String>,
    pub creator_name: Option<String>,
}

impl From<RegisterDocumentRequest> for NewDocument {
    fn from(req: RegisterDocumentRequest) -> Self {
        NewDocument {
            file_name: req.file_name,
            original_file_name: req.original_file_name,
            document_type: req.document_type,
            department: req.department,
            access_level: req.access_level,
            version: req.version,
            category: req.category,
            tags: req.tags,
            description: req.description,
            creator_name: req.creator_name,
        }
    }
}

/// Partial metadata update. Fields outside this list are rejected.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateDocumentRequest {
    pub document_type: Option<DocumentType>,
    pub access_level: Option<AccessLevel>,
    pub version: Option<String>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
    pub description: Option<String>,
}

impl From<UpdateDocumentRequest> for DocumentPatch {
    fn from(req: UpdateDocumentRequest) -> Self {
        DocumentPatch {
            document_type: req.document_type,
            access_level: req.access_level,
            version: req.version,
            category: req.category,
            tags: req.tags,
            description: req.description,
        }
    }
}

/// Response for delete operations
#[derive(Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
}

pub(super) fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> ServiceResult<T> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ServiceError::validation(rejection.body_text()))
}

fn bad_multipart(e: impl std::fmt::Display) -> ServiceError {
    ServiceError::validation(format!("invalid multipart body: {e}"))
}

/// List documents visible to the caller
pub async fn list_documents_handler(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ServiceResult<Json<DocumentPage>> {
    let Query(query) = query.map_err(|r| ServiceError::validation(r.body_text()))?;
    let page = state.service.list(&principal, query)?;
    Ok(Json(page))
}

/// Register a new document
pub async fn register_document_handler(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    body: Result<Json<RegisterDocumentRequest>, JsonRejection>,
) -> ServiceResult<(StatusCode, Json<Document>)> {
    let request = json_body(body)?;
    let document = state.service.register(&principal, request.into())?;
    Ok((StatusCode::CREATED, Json(document)))
}

/// Get a single document
pub async fn get_document_handler(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<String>,
) -> ServiceResult<Json<Document>> {
    let document = state.service.fetch(&principal, &id)?;
    Ok(Json(document))
}

/// Update document metadata
pub async fn update_document_handler(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<String>,
    body: Result<Json<UpdateDocumentRequest>, JsonRejection>,
) -> ServiceResult<Json<Document>> {
    let request = json_body(body)?;
    let document = state.service.update(&principal, &id, request.into())?;
    Ok(Json(document))
}

/// Soft-delete a document
pub async fn delete_document_handler(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<String>,
) -> ServiceResult<Json<DeleteResponse>> {
    state.service.soft_delete(&principal, &id).await?;
    Ok(Json(DeleteResponse {
        success: true,
        message: format!("Document {id} deleted"),
    }))
}

/// Upload a document's PDF payload
pub async fn upload_payload_handler(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ServiceResult<Json<Document>> {
    let mut multipart = multipart.map_err(|r| ServiceError::validation(r.body_text()))?;
    let mut upload: Option<PayloadUpload> = None;
    let mut file_name_override: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let content_type = field.content_type().map(str::to_string);
                let declared_name = field.file_name().map(str::to_string);
                let bytes = field.bytes().await.map_err(bad_multipart)?;
                upload = Some(PayloadUpload {
                    bytes,
                    content_type,
                    declared_name,
                });
            }
            "fileName" => {
                file_name_override = Some(field.text().await.map_err(bad_multipart)?);
            }
            _ => {}
        }
    }

    let mut upload = upload.ok_or_else(|| ServiceError::validation("No file provided"))?;
    if let Some(name) = file_name_override.filter(|n| !n.trim().is_empty()) {
        upload.declared_name = Some(name);
    }

    let document = state
        .service
        .attach_payload(&principal, &id, upload)
        .await?;
    Ok(Json(document))
}

/// Download a document's payload
pub async fn download_document_handler(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<String>,
) -> ServiceResult<Response> {
    let payload = state.service.download(&principal, &id).await?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        urlencoding::encode(&payload.document.original_file_name)
    );

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CONTENT_LENGTH, payload.bytes.len().to_string()),
        ],
        Body::from(payload.bytes),
    )
        .into_response())
}

/// Re-queue a document for embedding
pub async fn retry_embedding_handler(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<String>,
) -> ServiceResult<Json<Document>> {
    let document = state.service.retry_embedding(&principal, &id)?;
    Ok(Json(document))
}
