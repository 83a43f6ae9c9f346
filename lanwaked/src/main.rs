mod api;
mod config;
mod discovery;
mod error;
mod registry;
mod registry_manager;
mod wake;

use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};
use anyhow::{Context, Result};
use crate::config::{Config, LogConfig, Strategy};
use crate::discovery::DiscoveryService;
use crate::registry::db::RegistryDb;
use crate::registry_manager::RegistryHandle;
use crate::wake::WakeDispatcher;

/// Stdout logging, plus a daily-rotated file when `[log] dir` is set.
/// The returned guard flushes the file writer and must outlive the runtime.
fn init_tracing(log: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("lanwaked=info"));

    let (file_layer, guard) = match &log.dir {
        Some(dir) => {
            let appender = Builder::new()
                .rotation(Rotation::DAILY)
                .filename_prefix("lanwaked")
                .filename_suffix("log")
                .max_log_files(log.max_files)
                .build(dir)
                .with_context(|| format!("Failed to create log file in {}", dir.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/lanwake/lanwaked.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    let _log_guard = init_tracing(&config.log)?;

    tracing::info!("Starting lanwaked");
    tracing::info!("Loaded config from {}", config_path);

    let discovery = Arc::new(DiscoveryService::system(config.discovery.clone()));

    // Raw ARP needs privilege; only fatal when there is nothing to fall back to
    match discovery.strategy() {
        Strategy::Sweep => tracing::info!("Discovery strategy is sweep, raw access not required"),
        strategy => match discovery.check_raw_access() {
            Ok(iface) => tracing::info!("Raw link-layer access on {}", iface),
            Err(e) if strategy == Strategy::Arp => {
                return Err(anyhow::Error::new(e))
                    .context("ARP discovery requires raw socket access (run as root or grant CAP_NET_RAW)");
            }
            Err(e) => tracing::warn!("Raw link-layer access unavailable, scans will use the sweep: {}", e),
        },
    }

    // Open SQLite database
    let db = RegistryDb::open(&config.registry.db_path)?;
    tracing::info!("Opened database at {:?}", config.registry.db_path);

    // Compute initial hash
    let initial_devices = db.list_history()?;
    let initial_hash = registry::hash::compute_hash(&initial_devices);
    tracing::info!("Registry holds {} devices, hash {}", initial_devices.len(), initial_hash);

    let (hash_tx, hash_rx) = watch::channel(initial_hash);

    // Start registry thread
    let registry_handle = RegistryHandle::spawn(db, hash_tx);

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Build API router
    let app_state = api::routes::AppState {
        discovery,
        registry: registry_handle.clone(),
        wake: Arc::new(WakeDispatcher::new(&config.wake)),
        hash_rx,
        shutdown: cancel.clone(),
    };
    let app = api::routes::router(app_state);

    // Bind HTTP server
    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    // Run server with graceful shutdown
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    // In-flight scans return what they have, then the server drains
    cancel.cancel();

    let _ = server_handle.await;

    // Shutdown registry thread
    if let Err(e) = registry_handle.shutdown().await {
        tracing::error!("Failed to shutdown registry: {}", e);
    }

    tracing::info!("Shutdown complete");

    Ok(())
}
