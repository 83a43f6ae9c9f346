//! Neighbor (ARP) cache lookups.
//!
//! Linux is read with `ip neigh show <ip>`, other platforms with `arp -n <ip>`.
//! Entries only exist after a round-trip to the host, so look up after a
//! successful probe.

use std::net::Ipv4Addr;
use tokio::process::Command;
use tracing::trace;
use shared::types::MacAddress;

/// Hardware address cached for `ip`, if any
pub async fn lookup(ip: Ipv4Addr) -> Option<MacAddress> {
    let output = match neighbor_command(ip).output().await {
        Ok(output) => output,
        Err(e) => {
            trace!(ip = %ip, error = %e, "Neighbor cache query failed");
            return None;
        }
    };

    if !output.status.success() {
        return None;
    }

    parse_neighbor_output(&String::from_utf8_lossy(&output.stdout), ip)
}

#[cfg(target_os = "linux")]
fn neighbor_command(ip: Ipv4Addr) -> Command {
    let mut cmd = Command::new("ip");
    cmd.args(["neigh", "show", &ip.to_string()]);
    cmd
}

#[cfg(not(target_os = "linux"))]
fn neighbor_command(ip: Ipv4Addr) -> Command {
    let mut cmd = Command::new("arp");
    cmd.args(["-n", &ip.to_string()]);
    cmd
}

/// Find the line naming `ip` and take the first hardware address on it.
///
/// Understands `ip neigh` ("192.168.1.1 dev eth0 lladdr aa:bb:.. REACHABLE"),
/// net-tools `arp -n` and the BSD form ("? (192.168.1.1) at 0:1a:2b:.. on en0"),
/// which drops leading zeros.
pub fn parse_neighbor_output(stdout: &str, ip: Ipv4Addr) -> Option<MacAddress> {
    let ip = ip.to_string();

    stdout.lines().find_map(|line| {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let names_ip = tokens
            .iter()
            .any(|t| t.trim_start_matches('(').trim_end_matches(')') == ip);
        if !names_ip {
            return None;
        }
        tokens.iter().find_map(|t| parse_loose_mac(t))
    })
}

fn parse_loose_mac(token: &str) -> Option<MacAddress> {
    let sep = if token.contains(':') { ':' } else { '-' };
    let parts: Vec<&str> = token.split(sep).collect();
    if parts.len() != 6 {
        return None;
    }

    let mut octets = [0u8; 6];
    for (octet, part) in octets.iter_mut().zip(&parts) {
        if part.is_empty() || part.len() > 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        *octet = u8::from_str_radix(part, 16).ok()?;
    }

    // Incomplete entries on some platforms
    if octets == [0u8; 6] {
        return None;
    }
    Some(MacAddress::new(octets))
}
