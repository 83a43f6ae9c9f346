use std::net::Ipv4Addr;
use serde::Serialize;
use sha2::{Sha256, Digest};
use shared::types::{DeviceRecord, MacAddress};

/// Only identity-bearing fields: a rescan that re-observes the same devices
/// moves `scan_time` but must not change the digest.
#[derive(Serialize)]
struct HashView<'a> {
    mac_address: MacAddress,
    ip_address: Ipv4Addr,
    hostname: &'a str,
    network_segment: &'a str,
}

/// SHA-256 over the registry contents, independent of row order
pub fn compute_hash(records: &[DeviceRecord]) -> String {
    let mut indices: Vec<usize> = (0..records.len()).collect();
    indices.sort_by_key(|&i| records[i].mac_address);

    let views: Vec<HashView<'_>> = indices
        .iter()
        .map(|&i| {
            let r = &records[i];
            HashView {
                mac_address: r.mac_address,
                ip_address: r.ip_address,
                hostname: &r.hostname,
                network_segment: &r.network_segment,
            }
        })
        .collect();

    let json = serde_json::to_string(&views)
        .expect("Failed to serialize devices for hashing");

    let hash = Sha256::digest(json.as_bytes());
    hex::encode(hash)
}
