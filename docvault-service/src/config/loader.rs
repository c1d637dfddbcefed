//! Configuration loading from files and environment variables.

use config::{Config, Environment, File};

use crate::error::{ServiceError, ServiceResult};

use super::static_config::StaticConfig;

/// Load static configuration from file and env vars
pub fn load_static_config() -> ServiceResult<StaticConfig> {
    let config: StaticConfig = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::with_prefix("DOCVAULT")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to build config: {}", e),
        })?
        .try_deserialize()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to deserialize static config: {}", e),
        })?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &StaticConfig) -> ServiceResult<()> {
    if config.listing.default_page_size == 0 || config.listing.max_page_size == 0 {
        return Err(ServiceError::Config {
            message: "listing page sizes must be positive".to_string(),
        });
    }
    if config.listing.default_page_size > config.listing.max_page_size {
        return Err(ServiceError::Config {
            message: "listing.default_page_size exceeds listing.max_page_size".to_string(),
        });
    }
    if config.limits.max_payload_bytes == 0 {
        return Err(ServiceError::Config {
            message: "limits.max_payload_bytes must be positive".to_string(),
        });
    }
    Ok(())
}
