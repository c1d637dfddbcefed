//! HTTP API for the DocVault service.
//!
//! This module provides the REST API endpoints for:
//! - Health and metrics monitoring
//! - Document registration, listing, update and soft delete
//! - Payload upload and download
//! - Embedding retry and the internal worker callback

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::service::DocVaultService;

pub mod documents;
pub mod embeddings;
pub mod principal;

use documents::{
    delete_document_handler, download_document_handler, get_document_handler,
    list_documents_handler, register_document_handler, retry_embedding_handler,
    update_document_handler, upload_payload_handler,
};
use embeddings::report_embedding_handler;

/// Room for multipart framing and the text fields around the file part
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Application state
pub struct AppState {
    pub service: Arc<DocVaultService>,
    pub start_time: Instant,
    pub metrics: Option<PrometheusHandle>,
}

fn timeout_layer(timeout: Duration) -> TimeoutLayer {
    TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, timeout)
}

/// Build the API router
pub fn router(service: Arc<DocVaultService>, metrics: Option<PrometheusHandle>) -> Router {
    let limits = service.config.limits.clone();

    let state = Arc::new(AppState {
        service,
        start_time: Instant::now(),
        metrics,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let max_body_size = (limits.max_payload_bytes as usize).saturating_add(MULTIPART_OVERHEAD_BYTES);

    let api_routes = Router::new()
        .route(
            "/documents",
            get(list_documents_handler).post(register_document_handler),
        )
        .route(
            "/documents/{id}",
            get(get_document_handler)
                .patch(update_document_handler)
                .delete(delete_document_handler),
        )
        .route(
            "/documents/{id}/payload",
            post(upload_payload_handler).layer(DefaultBodyLimit::max(max_body_size)),
        )
        .route("/documents/{id}/download", get(download_document_handler))
        .route(
            "/documents/{id}/embedding/retry",
            post(retry_embedding_handler),
        );

    let internal_routes = Router::new().route(
        "/documents/{id}/embedding",
        post(report_embedding_handler),
    );

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .nest("/api", api_routes)
        .nest("/internal", internal_routes)
        .layer(cors)
        .layer(timeout_layer(limits.request_timeout()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// === Health & Metrics ===

async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    let database = state.service.db.ping().is_ok();
    let status = if database { "healthy" } else { "degraded" };
    let code = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        database_available: database,
        embedding_worker_configured: state.service.embedding.is_enabled(),
    };
    (code, Json(body)).into_response()
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    database_available: bool,
    embedding_worker_configured: bool,
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
