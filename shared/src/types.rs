use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use crate::protocol::UNKNOWN;

/// A 6-octet link-layer (MAC) address.
///
/// Parses colon- or hyphen-separated hex in either case and always displays
/// in the canonical lower-case colon form, so two spellings of the same
/// address compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress([u8; 6]);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid hardware address: {0:?}")]
pub struct ParseMacError(pub String);

impl MacAddress {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

impl FromStr for MacAddress {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseMacError(s.to_string());

        let s_trimmed = s.trim();
        let sep = if s_trimmed.contains(':') { ':' } else { '-' };
        let parts: Vec<&str> = s_trimmed.split(sep).collect();
        if parts.len() != 6 {
            return Err(invalid());
        }

        let mut octets = [0u8; 6];
        for (octet, part) in octets.iter_mut().zip(&parts) {
            // from_str_radix tolerates a leading '+', so check the digits ourselves
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }

        Ok(Self(octets))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", a, b, c, d, e, g)
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One host found by a discovery run.
/// This is what `/scan` returns; it is upserted into the registry and then dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    /// Reverse-DNS name, or "Unknown"
    pub hostname: String,

    pub ip_address: Ipv4Addr,

    /// Canonical hardware address, or "Unknown" when the fallback sweep
    /// could not read it from the neighbor cache
    pub mac_address: String,
}

impl DiscoveredDevice {
    pub fn new(hostname: Option<String>, ip_address: Ipv4Addr, mac: Option<MacAddress>) -> Self {
        Self {
            hostname: hostname.unwrap_or_else(|| UNKNOWN.to_string()),
            ip_address,
            mac_address: mac.map(|m| m.to_string()).unwrap_or_else(|| UNKNOWN.to_string()),
        }
    }

    /// The hardware address, if one was recovered
    pub fn hardware_address(&self) -> Option<MacAddress> {
        self.mac_address.parse().ok()
    }
}

/// A persisted device, keyed by hardware address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub hostname: String,

    /// Most recently observed IPv4 address
    pub ip_address: Ipv4Addr,

    pub mac_address: MacAddress,

    /// Last time this device answered a scan
    pub scan_time: DateTime<Utc>,

    /// CIDR block the device was last observed under
    pub network_segment: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_colon_and_hyphen_forms() {
        let a: MacAddress = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        let b: MacAddress = "aa-bb-cc-dd-ee-ff".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.octets(), [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert_eq!(a.to_string(), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            "invalid-mac",
            "",
            "aa:bb:cc:dd:ee",
            "aa:bb:cc:dd:ee:ff:00",
            "aa:bb:cc:dd:ee:gg",
            "aabb.ccdd.eeff",
            "a:bb:cc:dd:ee:fff",
            "+a:bb:cc:dd:ee:ff",
            "aa:bb-cc:dd:ee:ff",
        ] {
            assert!(bad.parse::<MacAddress>().is_err(), "{:?} should not parse", bad);
        }
    }

    #[test]
    fn test_discovered_device_sentinels() {
        let dev = DiscoveredDevice::new(None, Ipv4Addr::new(192, 168, 1, 7), None);
        assert_eq!(dev.hostname, UNKNOWN);
        assert_eq!(dev.mac_address, UNKNOWN);
        assert!(dev.hardware_address().is_none());
    }

    #[test]
    fn test_discovered_device_wire_shape() {
        let mac = MacAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let dev = DiscoveredDevice::new(
            Some("nas.lan".to_string()),
            Ipv4Addr::new(10, 0, 0, 2),
            Some(mac),
        );
        let json = serde_json::to_value(&dev).unwrap();
        assert_eq!(json["hostname"], "nas.lan");
        assert_eq!(json["ip_address"], "10.0.0.2");
        assert_eq!(json["mac_address"], "00:11:22:33:44:55");
    }
}
