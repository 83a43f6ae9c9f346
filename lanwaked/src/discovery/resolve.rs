//! Best-effort reverse DNS.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub trait ReverseLookup: Send + Sync + 'static {
    /// Blocking PTR lookup; `None` when the address has no name
    fn lookup(&self, ip: IpAddr) -> Option<String>;
}

/// The system resolver (getnameinfo)
pub struct SystemLookup;

impl ReverseLookup for SystemLookup {
    fn lookup(&self, ip: IpAddr) -> Option<String> {
        match dns_lookup::lookup_addr(&ip) {
            // getnameinfo hands back the numeric form when there is no PTR record
            Ok(name) if name != ip.to_string() => Some(name),
            Ok(_) => None,
            Err(e) => {
                debug!(ip = %ip, error = %e, "Reverse lookup failed");
                None
            }
        }
    }
}

/// Runs lookups on the blocking pool under a fixed per-lookup budget
#[derive(Clone)]
pub struct HostnameResolver {
    lookup: Arc<dyn ReverseLookup>,
    budget: Duration,
}

impl HostnameResolver {
    pub fn new(lookup: Arc<dyn ReverseLookup>, budget: Duration) -> Self {
        Self { lookup, budget }
    }

    /// Hostname for `ip`, or `None` on failure, timeout or cancellation
    pub async fn resolve(&self, ip: Ipv4Addr, cancel: &CancellationToken) -> Option<String> {
        let lookup = self.lookup.clone();
        let task = tokio::task::spawn_blocking(move || lookup.lookup(IpAddr::V4(ip)));

        tokio::select! {
            result = tokio::time::timeout(self.budget, task) => match result {
                Ok(Ok(name)) => name,
                Ok(Err(e)) => {
                    debug!(ip = %ip, error = %e, "Reverse lookup task failed");
                    None
                }
                Err(_) => {
                    debug!(ip = %ip, "Reverse lookup timed out");
                    None
                }
            },
            _ = cancel.cancelled() => None,
        }
    }
}
