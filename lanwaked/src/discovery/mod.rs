//! Host discovery on a local IPv4 segment.
//!
//! `DiscoveryService` owns the single discovery slot: scans are serialized so
//! concurrent requests never broadcast on the same interface at once.

pub mod arp;
pub mod interface;
pub mod link;
pub mod neighbor;
pub mod resolve;
pub mod segment;
pub mod sweep;

#[cfg(test)]
pub mod testing;

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use ipnet::Ipv4Net;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use shared::types::DiscoveredDevice;
use crate::config::{DiscoveryConfig, Strategy};
use crate::discovery::arp::ArpEngine;
use crate::discovery::link::{LinkInterface, LinkLayer, PnetLink};
use crate::discovery::resolve::{HostnameResolver, ReverseLookup, SystemLookup};
use crate::discovery::sweep::{FallbackSweep, HostProbe, SystemProbe};
use crate::error::{Error, Result};

/// Outcome of one discovery run
#[derive(Debug, Clone)]
pub struct ScanReport {
    /// The requested segment, normalized
    pub network: Ipv4Net,
    pub devices: Vec<DiscoveredDevice>,
}

pub struct DiscoveryService {
    platform: String,
    config: DiscoveryConfig,
    link: Arc<dyn LinkLayer>,
    arp: ArpEngine,
    sweep: FallbackSweep,
    slot: Mutex<()>,
}

impl DiscoveryService {
    pub fn new(
        config: DiscoveryConfig,
        link: Arc<dyn LinkLayer>,
        lookup: Arc<dyn ReverseLookup>,
        probe: Arc<dyn HostProbe>,
    ) -> Self {
        let resolver = HostnameResolver::new(lookup, Duration::from_millis(config.hostname_timeout_ms));
        let arp = ArpEngine::new(
            link.clone(),
            resolver.clone(),
            Duration::from_millis(config.arp_timeout_ms),
            config.resolver_concurrency,
        );
        let sweep = FallbackSweep::new(
            probe,
            resolver,
            Duration::from_secs(config.ping_timeout_secs),
            config.sweep_concurrency,
        );

        Self {
            platform: interface::current_platform().to_string(),
            config,
            link,
            arp,
            sweep,
            slot: Mutex::new(()),
        }
    }

    /// Production wiring: pnet channels, system resolver, system `ping`
    pub fn system(config: DiscoveryConfig) -> Self {
        Self::new(config, Arc::new(PnetLink), Arc::new(SystemLookup), Arc::new(SystemProbe))
    }

    pub fn strategy(&self) -> Strategy {
        self.config.strategy
    }

    /// Pick the interface raw probes go out on
    pub fn select_interface(&self) -> Result<LinkInterface> {
        let available = self.link.interfaces();
        let names: Vec<String> = available.iter().map(|i| i.name.clone()).collect();
        let chosen = interface::select_interface(&names, &self.platform, &self.config.interfaces)?;

        available
            .into_iter()
            .find(|i| i.name == chosen)
            .ok_or(Error::NoInterfaceAvailable)
    }

    /// Open (and close) a raw channel on the probe interface. Used at startup
    /// to find out whether ARP discovery can work at all.
    pub fn check_raw_access(&self) -> Result<String> {
        let iface = self.select_interface()?;
        self.arp.check_access(&iface.name)?;
        Ok(iface.name)
    }

    /// Discover the hosts of a CIDR segment.
    ///
    /// Only a malformed segment is an error, and it is reported before any
    /// network activity. Engine failures are logged and produce an empty (or,
    /// under `auto`, a swept) result. When `cancel` fires or the scan deadline
    /// passes, whatever was collected so far is returned.
    pub async fn scan(&self, segment: &str, cancel: &CancellationToken) -> Result<ScanReport> {
        let network = segment::parse_cidr(segment, self.config.min_prefix_len)?;

        let _slot = tokio::select! {
            guard = self.slot.lock() => guard,
            _ = cancel.cancelled() => {
                info!(segment = %network, "Scan cancelled while waiting for the discovery slot");
                return Ok(ScanReport { network, devices: Vec::new() });
            }
        };

        let scan_cancel = cancel.child_token();
        let deadline = Duration::from_secs(self.config.scan_deadline_secs);
        let timer_cancel = scan_cancel.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            timer_cancel.cancel();
        });

        let devices = self.run_strategy(&network, &scan_cancel).await;
        timer.abort();

        if scan_cancel.is_cancelled() {
            warn!(segment = %network, found = devices.len(), "Scan cut short, returning partial results");
        }
        info!(segment = %network, found = devices.len(), "Scan finished");

        Ok(ScanReport { network, devices })
    }

    async fn run_strategy(&self, network: &Ipv4Net, cancel: &CancellationToken) -> Vec<DiscoveredDevice> {
        if self.config.strategy == Strategy::Sweep {
            info!(segment = %network, "Starting sweep");
            return self.sweep.sweep_segment(network, cancel).await;
        }

        match self.arp_scan(network, segment::host_addresses(network), cancel).await {
            Ok(devices) => devices,
            Err(e) if self.config.strategy == Strategy::Auto => {
                warn!(segment = %network, error = %e, "ARP discovery unavailable, falling back to sweep");
                self.sweep.sweep_segment(network, cancel).await
            }
            Err(e) => {
                warn!(segment = %network, error = %e, "ARP discovery failed, no devices reported");
                Vec::new()
            }
        }
    }

    async fn arp_scan(
        &self,
        network: &Ipv4Net,
        targets: Vec<Ipv4Addr>,
        cancel: &CancellationToken,
    ) -> Result<Vec<DiscoveredDevice>> {
        let iface = self.select_interface()?;
        info!(
            segment = %network,
            interface = %iface.name,
            hosts = targets.len(),
            "Starting ARP scan"
        );
        self.arp.discover(&iface, targets, cancel).await
    }
}
