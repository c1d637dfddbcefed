use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Main service error type
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Invalid request: {message}")]
    Validation { message: String },

    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    /// Absent, soft-deleted, and invisible documents all collapse into this
    /// variant so callers cannot probe access-control state.
    #[error("Document not found: {document_id}")]
    NotFound { document_id: String },

    #[error("Document {document_id} has no payload yet")]
    PayloadNotReady { document_id: String },

    #[error("Document {document_id} was deleted while the write was in flight")]
    ConflictOnDelete { document_id: String },

    #[error("Object storage failure")]
    Storage(#[from] StorageError),

    #[error("Database error")]
    Database(#[from] DatabaseError),

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::Validation {
            message: message.into(),
        }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        ServiceError::PermissionDenied {
            message: message.into(),
        }
    }

    pub fn not_found(document_id: impl Into<String>) -> Self {
        ServiceError::NotFound {
            document_id: document_id.into(),
        }
    }
}

/// Database errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed")]
    Connection(#[source] rusqlite::Error),

    #[error("Query failed")]
    Query(#[source] rusqlite::Error),

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Serialization failed")]
    Serialization(#[source] serde_json::Error),

    #[error("Database connection lock poisoned")]
    Poisoned,
}

/// Object store errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found: {key}")]
    ObjectNotFound { key: String },

    #[error("Invalid object key: {key}")]
    InvalidKey { key: String },

    #[error("IO error on object {key}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Object store unavailable for {key}")]
    Unavailable { key: String },
}

/// Embedding worker trigger errors
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Connection failed to embedding worker at {url}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Embedding worker rejected trigger (status {status})")]
    Rejected { status: u16 },
}

/// API error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Validation { .. } => StatusCode::BAD_REQUEST,
            ServiceError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
            ServiceError::NotFound { .. }
            | ServiceError::PayloadNotReady { .. }
            | ServiceError::ConflictOnDelete { .. } => StatusCode::NOT_FOUND,
            ServiceError::Storage(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ServiceError::Validation { .. } => "validation_error",
            ServiceError::PermissionDenied { .. } => "permission_denied",
            ServiceError::NotFound { .. } => "not_found",
            ServiceError::PayloadNotReady { .. } => "payload_not_ready",
            ServiceError::ConflictOnDelete { .. } => "conflict_on_delete",
            ServiceError::Storage(_) => "storage_failure",
            ServiceError::Database(_) => "database_error",
            ServiceError::Config { .. } => "config_error",
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %format_error_chain(&self), "Request failed");
        }

        let response = ErrorResponse {
            message: self.to_string(),
            code: Some(self.error_code().to_string()),
        };

        (status, Json(response)).into_response()
    }
}

/// Render an error and all of its sources on one line for log output.
pub fn format_error_chain(error: &dyn std::error::Error) -> String {
    let mut out = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;
