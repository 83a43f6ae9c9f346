//! Network segment parsing: CIDR blocks for ARP, /24 prefixes for the sweep.

use std::net::Ipv4Addr;
use ipnet::Ipv4Net;
use crate::error::{Error, Result};

/// Validate a CIDR segment such as `192.168.1.0/24`.
///
/// Host bits are allowed (`192.168.1.77/24` names the same block). A string
/// without `/`, or a block wider than `/min_prefix_len`, is rejected before
/// anything else happens.
pub fn parse_cidr(segment: &str, min_prefix_len: u8) -> Result<Ipv4Net> {
    let segment = segment.trim();
    if !segment.contains('/') {
        return Err(Error::InvalidSegment(segment.to_string()));
    }

    let net = segment
        .parse::<Ipv4Net>()
        .map_err(|_| Error::InvalidSegment(segment.to_string()))?;

    if net.prefix_len() < min_prefix_len {
        return Err(Error::InvalidSegment(format!(
            "{} (prefix shorter than /{})",
            segment, min_prefix_len
        )));
    }

    Ok(net.trunc())
}

/// Every probe target in the block.
///
/// Network and broadcast addresses are excluded for prefixes up to /30;
/// /31 and /32 yield all of their addresses.
pub fn host_addresses(net: &Ipv4Net) -> Vec<Ipv4Addr> {
    net.hosts().collect()
}

/// Leading octets of every /24 the block spans. A block narrower than /24
/// lies inside one.
pub fn prefix24_blocks(net: &Ipv4Net) -> Vec<[u8; 3]> {
    let leading = |addr: Ipv4Addr| {
        let [a, b, c, _] = addr.octets();
        [a, b, c]
    };

    match net.subnets(24) {
        Ok(blocks) if net.prefix_len() <= 24 => blocks.map(|block| leading(block.network())).collect(),
        _ => vec![leading(net.network())],
    }
}

/// Hosts .1 through .254 under a /24 prefix
pub fn prefix24_hosts(prefix: [u8; 3]) -> Vec<Ipv4Addr> {
    let [a, b, c] = prefix;
    (1..=254).map(|d| Ipv4Addr::new(a, b, c, d)).collect()
}
