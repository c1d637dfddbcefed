//! Internal callback used by the embedding worker.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::HeaderMap,
};
use std::sync::Arc;

use crate::db::Document;
use crate::error::{ServiceError, ServiceResult};
use crate::service::EmbeddingReport;

use super::AppState;
use super::documents::json_body;

pub const CALLBACK_TOKEN_HEADER: &str = "x-callback-token";

fn verify_callback_token(expected: Option<&str>, headers: &HeaderMap) -> ServiceResult<()> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let supplied = headers
        .get(CALLBACK_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());
    if supplied != Some(expected) {
        return Err(ServiceError::permission_denied("invalid callback token"));
    }
    Ok(())
}

/// Record an embedding status report from the worker
pub async fn report_embedding_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Result<Json<EmbeddingReport>, JsonRejection>,
) -> ServiceResult<Json<Document>> {
    verify_callback_token(
        state.service.config.embedding.callback_token.as_deref(),
        &headers,
    )?;
    let report = json_body(body)?;
    let document = state.service.report_embedding_status(&id, report)?;
    Ok(Json(document))
}
