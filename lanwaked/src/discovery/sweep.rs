//! Fallback discovery without raw sockets: ping each candidate, then read
//! the neighbor cache for the hosts that answered.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use ipnet::Ipv4Net;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use shared::types::{DiscoveredDevice, MacAddress};
use crate::discovery::neighbor;
use crate::discovery::resolve::HostnameResolver;
use crate::discovery::segment;

/// Slack on top of the ping's own timeout before the process is abandoned
const PING_GRACE: Duration = Duration::from_millis(500);

#[async_trait]
pub trait HostProbe: Send + Sync {
    /// One echo request; `false` on no reply within `timeout` or any error
    async fn is_reachable(&self, ip: Ipv4Addr, timeout: Duration) -> bool;

    async fn neighbor_mac(&self, ip: Ipv4Addr) -> Option<MacAddress>;
}

/// Uses the system `ping` binary, which works without raw-socket privilege
pub struct SystemProbe;

#[async_trait]
impl HostProbe for SystemProbe {
    async fn is_reachable(&self, ip: Ipv4Addr, timeout: Duration) -> bool {
        let mut cmd = ping_command(ip, timeout);
        cmd.kill_on_drop(true);

        match tokio::time::timeout(timeout + PING_GRACE, cmd.output()).await {
            Ok(Ok(output)) => output.status.success(),
            Ok(Err(e)) => {
                debug!(ip = %ip, error = %e, "ping failed to run");
                false
            }
            Err(_) => false,
        }
    }

    async fn neighbor_mac(&self, ip: Ipv4Addr) -> Option<MacAddress> {
        neighbor::lookup(ip).await
    }
}

#[cfg(target_os = "linux")]
fn ping_command(ip: Ipv4Addr, timeout: Duration) -> Command {
    let secs = timeout.as_secs().max(1).to_string();
    let mut cmd = Command::new("ping");
    cmd.args(["-c", "1", "-W", &secs, &ip.to_string()]);
    cmd
}

#[cfg(target_os = "windows")]
fn ping_command(ip: Ipv4Addr, timeout: Duration) -> Command {
    let millis = timeout.as_millis().max(1).to_string();
    let mut cmd = Command::new("ping");
    cmd.args(["-n", "1", "-w", &millis, &ip.to_string()]);
    cmd
}

// BSD ping takes the wait time in milliseconds
#[cfg(not(any(target_os = "linux", target_os = "windows")))]
fn ping_command(ip: Ipv4Addr, timeout: Duration) -> Command {
    let millis = timeout.as_millis().max(1).to_string();
    let mut cmd = Command::new("ping");
    cmd.args(["-c", "1", "-W", &millis, &ip.to_string()]);
    cmd
}

pub struct FallbackSweep {
    probe: Arc<dyn HostProbe>,
    resolver: HostnameResolver,
    ping_timeout: Duration,
    concurrency: usize,
}

impl FallbackSweep {
    pub fn new(
        probe: Arc<dyn HostProbe>,
        resolver: HostnameResolver,
        ping_timeout: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            probe,
            resolver,
            ping_timeout,
            concurrency: concurrency.max(1),
        }
    }

    /// Sweep hosts 1-254 under a /24 prefix such as `[192, 168, 1]`
    pub async fn sweep_prefix(&self, prefix: [u8; 3], cancel: &CancellationToken) -> Vec<DiscoveredDevice> {
        self.sweep(segment::prefix24_hosts(prefix), cancel).await
    }

    /// Sweep a CIDR segment one /24 at a time. A segment narrower than /24
    /// only probes its own hosts.
    pub async fn sweep_segment(&self, network: &Ipv4Net, cancel: &CancellationToken) -> Vec<DiscoveredDevice> {
        if network.prefix_len() > 24 {
            return self.sweep(segment::host_addresses(network), cancel).await;
        }

        let mut devices = Vec::new();
        for prefix in segment::prefix24_blocks(network) {
            if cancel.is_cancelled() {
                break;
            }
            devices.extend(self.sweep_prefix(prefix, cancel).await);
        }
        devices
    }

    /// Probe every target, at most `concurrency` at a time. Hosts that do not
    /// answer are left out; results keep target order. On cancellation the
    /// hosts finished so far are returned.
    pub async fn sweep(
        &self,
        targets: Vec<Ipv4Addr>,
        cancel: &CancellationToken,
    ) -> Vec<DiscoveredDevice> {
        let total = targets.len();

        let mut found: Vec<(usize, DiscoveredDevice)> = stream::iter(targets.into_iter().enumerate())
            .map(|(idx, ip)| async move { (idx, self.probe_host(ip, cancel).await) })
            .buffer_unordered(self.concurrency)
            .take_until(cancel.cancelled())
            .filter_map(|(idx, device)| async move { device.map(|d| (idx, d)) })
            .collect()
            .await;

        found.sort_by_key(|(idx, _)| *idx);
        debug!(probed = total, found = found.len(), "Sweep finished");

        found.into_iter().map(|(_, device)| device).collect()
    }

    async fn probe_host(&self, ip: Ipv4Addr, cancel: &CancellationToken) -> Option<DiscoveredDevice> {
        if !self.probe.is_reachable(ip, self.ping_timeout).await {
            return None;
        }

        // The cache entry exists only after the echo round-trip
        let mac = self.probe.neighbor_mac(ip).await;
        let hostname = self.resolver.resolve(ip, cancel).await;

        debug!(ip = %ip, mac = ?mac, "Host answered sweep");
        Some(DiscoveredDevice::new(hostname, ip, mac))
    }
}
