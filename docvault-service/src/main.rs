use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tracing::{info, warn};

mod access;
mod api;
mod config;
mod db;
mod embedding;
mod error;
mod service;
mod storage;

use crate::config::load_static_config;
use crate::db::Database;
use crate::service::DocVaultService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    init_logging();

    info!("Starting DocVault service v{}", env!("CARGO_PKG_VERSION"));

    let static_config = Arc::new(load_static_config()?);
    info!(
        host = %static_config.server.host,
        port = static_config.server.port,
        backend = ?static_config.storage.backend,
        "Configuration loaded"
    );

    // Ensure data directory exists
    std::fs::create_dir_all(&static_config.storage.data_dir)?;

    let db_path = static_config.storage.data_dir.join("docvault.db");
    let db = Arc::new(Database::open(&db_path)?);
    info!(path = %db_path.display(), "Database initialized");

    let store = storage::from_config(&static_config.storage)?;

    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Prometheus recorder not installed; /metrics disabled");
            None
        }
    };

    let service = Arc::new(DocVaultService::new(static_config.clone(), db, store)?);

    // Settle embeddings a previous process left mid-flight
    match service.reconcile_stuck_embeddings() {
        Ok(summary) if summary.completed + summary.failed > 0 => info!(
            completed = summary.completed,
            failed = summary.failed,
            "Reconciled interrupted embeddings"
        ),
        Err(e) => warn!(error = %e, "Embedding reconciliation failed"),
        _ => {}
    }

    let app = api::router(service, metrics);

    let addr = format!(
        "{}:{}",
        static_config.server.host, static_config.server.port
    );
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let format = fmt::format()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    // Use RUST_LOG if set, otherwise default to info level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("docvault_service=info,tower_http=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format))
        .with(filter)
        .init();
}
