//! Embedding worker client.
//!
//! The worker pulls the payload from object storage on its own; the service
//! only tells it which document to process and later receives status
//! reports through the internal callback route. Reports echo the job's
//! `content_hash` so results for a replaced payload can be told apart.

use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{EmbeddingError, ServiceError, ServiceResult};

/// Body of a trigger request: one payload to embed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbeddingJob {
    pub document_id: String,
    pub storage_path: String,
    pub content_hash: String,
}

/// HTTP client for the out-of-process embedding worker
pub struct EmbeddingClient {
    client: Client,
    worker_url: Option<String>,
}

impl EmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> ServiceResult<Self> {
        let worker_url = config
            .worker_url
            .as_ref()
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ServiceError::Config {
                message: format!("failed to build embedding client: {e}"),
            })?;

        Ok(Self { client, worker_url })
    }

    /// Whether uploads are forwarded to a worker at all
    pub fn is_enabled(&self) -> bool {
        self.worker_url.is_some()
    }

    /// Ask the worker to embed a freshly attached payload.
    ///
    /// Returns `Ok(false)` without a request when no worker is configured.
    pub async fn trigger(&self, job: &EmbeddingJob) -> Result<bool, EmbeddingError> {
        let Some(base) = &self.worker_url else {
            return Ok(false);
        };
        let url = format!("{base}/embeddings");

        let response = self
            .client
            .post(&url)
            .json(job)
            .send()
            .await
            .map_err(|e| EmbeddingError::Connection {
                url: url.clone(),
                source: e,
            })?;

        if !response.status().is_success() {
            return Err(EmbeddingError::Rejected {
                status: response.status().as_u16(),
            });
        }

        Ok(true)
    }
}
