use std::sync::Arc;
use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use shared::protocol::{PATH_HISTORY, PATH_HISTORY_HASH, PATH_SCAN, PATH_WAKE};
use shared::types::{DeviceRecord, DiscoveredDevice};
use crate::discovery::DiscoveryService;
use crate::error::{Error, Result};
use crate::registry_manager::RegistryHandle;
use crate::wake::WakeDispatcher;

#[derive(Clone)]
pub struct AppState {
    pub discovery: Arc<DiscoveryService>,
    pub registry: RegistryHandle,
    pub wake: Arc<WakeDispatcher>,
    pub hash_rx: watch::Receiver<String>,
    /// Cancelled on shutdown; in-flight scans return what they have
    pub shutdown: CancellationToken,
}

#[derive(Deserialize)]
pub struct ScanRequest {
    pub network_segment: Option<String>,
}

#[derive(Deserialize)]
pub struct WakeRequest {
    pub mac_address: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(PATH_SCAN, post(scan))
        .route(PATH_HISTORY, get(history))
        .route(PATH_HISTORY_HASH, get(history_hash))
        .route(PATH_WAKE, post(wake))
        .with_state(state)
}

fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| Error::InvalidRequest(rejection.body_text()))
}

async fn scan(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ScanRequest>, JsonRejection>,
) -> Result<Json<Vec<DiscoveredDevice>>> {
    let segment = body(payload)?
        .network_segment
        .ok_or_else(|| Error::InvalidRequest("missing field network_segment".to_string()))?;

    let report = state.discovery.scan(&segment, &state.shutdown).await?;

    let summary = state
        .registry
        .record_scan(&report.devices, &report.network.to_string())
        .await
        .map_err(|e| {
            tracing::error!("Registry unavailable: {}", e);
            Error::StorageFailure(e.to_string())
        })?;

    tracing::info!(
        segment = %report.network,
        inserted = summary.inserted,
        updated = summary.updated,
        skipped = summary.skipped,
        failed = summary.failed,
        "Scan recorded"
    );

    Ok(Json(report.devices))
}

async fn history(State(state): State<AppState>) -> Result<Json<Vec<DeviceRecord>>> {
    state.registry.history().await.map(Json).map_err(|e| {
        tracing::error!("Failed to read history: {}", e);
        Error::StorageFailure(e.to_string())
    })
}

async fn history_hash(State(state): State<AppState>) -> String {
    state.hash_rx.borrow().clone()
}

async fn wake(
    State(state): State<AppState>,
    payload: std::result::Result<Json<WakeRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let mac = body(payload)?
        .mac_address
        .ok_or_else(|| Error::InvalidRequest("missing field mac_address".to_string()))?;

    state.wake.wake(&mac).await.map_err(|e| {
        tracing::warn!(mac = %mac, error = %e, "Wake failed");
        e
    })?;

    Ok(Json(json!({ "status": "success" })))
}
