use std::thread;
use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use anyhow::Result;
use tracing::{debug, error, info};
use shared::types::{DeviceRecord, DiscoveredDevice};
use crate::registry::db::{RegistryDb, UpsertOutcome};
use crate::registry::hash;

/// Commands sent to the registry thread
pub enum RegistryCommand {
    Upsert(DeviceRecord, oneshot::Sender<Result<UpsertOutcome>>),
    History(oneshot::Sender<Result<Vec<DeviceRecord>>>),
    Shutdown,
}

/// Per-scan tally of registry writes
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    pub inserted: usize,
    pub updated: usize,
    /// No hardware address, so nothing to key the row on
    pub skipped: usize,
    pub failed: usize,
}

/// Handle to the registry thread. The thread owns the only connection, so
/// writes from concurrent requests are applied one at a time.
#[derive(Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    /// Spawn the registry thread over `db`; `hash_tx` receives a new digest
    /// after every write that changed stored data
    pub fn spawn(db: RegistryDb, hash_tx: watch::Sender<String>) -> Self {
        let (tx, mut rx) = mpsc::channel::<RegistryCommand>(256);

        let recompute_hash = |db: &RegistryDb, hash_tx: &watch::Sender<String>| {
            if let Ok(records) = db.list_history() {
                let _ = hash_tx.send(hash::compute_hash(&records));
            }
        };

        thread::spawn(move || {
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    RegistryCommand::Upsert(record, reply) => {
                        let result = db.upsert(&record);
                        if matches!(&result, Ok(outcome) if outcome.changed()) {
                            recompute_hash(&db, &hash_tx);
                        }
                        let _ = reply.send(result);
                    }
                    RegistryCommand::History(reply) => {
                        let _ = reply.send(db.list_history());
                    }
                    RegistryCommand::Shutdown => {
                        info!("Registry thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    /// All devices, newest first
    pub async fn history(&self) -> Result<Vec<DeviceRecord>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RegistryCommand::History(reply)).await?;
        rx.await?
    }

    /// Write one scan's results under `segment`.
    ///
    /// A failed row is logged and counted, the rest are still written. Only a
    /// registry thread that is gone fails the whole call.
    pub async fn record_scan(&self, devices: &[DiscoveredDevice], segment: &str) -> Result<ScanSummary> {
        let mut summary = ScanSummary::default();

        for device in devices {
            let Some(mac) = device.hardware_address() else {
                debug!(ip = %device.ip_address, "No hardware address, not recorded");
                summary.skipped += 1;
                continue;
            };

            let record = DeviceRecord {
                hostname: device.hostname.clone(),
                ip_address: device.ip_address,
                mac_address: mac,
                scan_time: Utc::now(),
                network_segment: segment.to_string(),
            };

            let (reply, rx) = oneshot::channel();
            self.tx.send(RegistryCommand::Upsert(record, reply)).await?;
            match rx.await? {
                Ok(UpsertOutcome::Inserted) => {
                    info!(mac = %mac, ip = %device.ip_address, "Added new device");
                    summary.inserted += 1;
                }
                Ok(UpsertOutcome::Updated { .. }) => {
                    info!(mac = %mac, ip = %device.ip_address, "Updated device");
                    summary.updated += 1;
                }
                Err(e) => {
                    error!(mac = %mac, error = %e, "Failed to record device");
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Shutdown the registry thread
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(RegistryCommand::Shutdown).await?;
        Ok(())
    }
}
