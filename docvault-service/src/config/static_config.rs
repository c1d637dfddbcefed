//! Static configuration that cannot be changed at runtime.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Static configuration that cannot be changed at runtime
#[derive(Debug, Clone, Deserialize)]
pub struct StaticConfig {
    #[serde(default = "default_server")]
    pub server: ServerConfig,

    #[serde(default = "default_storage")]
    pub storage: StorageConfig,

    #[serde(default = "default_limits")]
    pub limits: LimitsConfig,

    #[serde(default = "default_listing")]
    pub listing: ListingConfig,

    #[serde(default = "default_embedding")]
    pub embedding: EmbeddingConfig,
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            storage: default_storage(),
            limits: default_limits(),
            listing: default_listing(),
            embedding: default_embedding(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Which object store holds payload bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Filesystem,
    /// Process-local; intended for development only
    Memory,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Holds the metadata database and, for the filesystem backend, `objects/`
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub backend: StorageBackend,
}

/// Upload and request ceilings
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: u64,

    /// Upper bound on any single request, uploads and downloads included
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl LimitsConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Pagination defaults for document listing
#[derive(Debug, Clone, Deserialize)]
pub struct ListingConfig {
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,

    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
}

/// Embedding worker integration
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    /// Base URL of the embedding worker. Uploads are not forwarded when unset.
    #[serde(default)]
    pub worker_url: Option<String>,

    #[serde(default = "default_embedding_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Shared secret the worker must present on status callbacks
    #[serde(default)]
    pub callback_token: Option<String>,
}

// ==================== Default Value Functions ====================

pub(crate) fn default_server() -> ServerConfig {
    ServerConfig {
        host: default_host(),
        port: default_port(),
    }
}

pub(crate) fn default_host() -> String {
    "0.0.0.0".to_string()
}

pub(crate) fn default_port() -> u16 {
    8080
}

pub(crate) fn default_storage() -> StorageConfig {
    StorageConfig {
        data_dir: default_data_dir(),
        backend: StorageBackend::default(),
    }
}

pub(crate) fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

pub(crate) fn default_limits() -> LimitsConfig {
    LimitsConfig {
        max_payload_bytes: default_max_payload_bytes(),
        request_timeout_secs: default_request_timeout_secs(),
    }
}

pub(crate) fn default_max_payload_bytes() -> u64 {
    50 * 1024 * 1024 // 50MB
}

pub(crate) fn default_request_timeout_secs() -> u64 {
    120
}

pub(crate) fn default_listing() -> ListingConfig {
    ListingConfig {
        default_page_size: default_page_size(),
        max_page_size: default_max_page_size(),
    }
}

pub(crate) fn default_page_size() -> u32 {
    10
}

pub(crate) fn default_max_page_size() -> u32 {
    100
}

pub(crate) fn default_embedding() -> EmbeddingConfig {
    EmbeddingConfig {
        worker_url: None,
        request_timeout_secs: default_embedding_timeout_secs(),
        callback_token: None,
    }
}

pub(crate) fn default_embedding_timeout_secs() -> u64 {
    30
}
