//! Service configuration.
//!
//! Values come from an optional `config.toml` followed by `DOCVAULT__*`
//! environment variables. Everything here is read once at startup.

mod loader;
mod static_config;

pub use loader::load_static_config;
pub use static_config::{EmbeddingConfig, StaticConfig, StorageBackend, StorageConfig};
