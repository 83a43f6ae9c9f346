/// Sentinel used when a hostname or hardware address could not be recovered
pub const UNKNOWN: &str = "Unknown";

/// Conventional Wake-on-LAN discard port
pub const WOL_PORT: u16 = 9;

/// Echo port, accepted by many NIC firmwares as an alternative
pub const WOL_ALT_PORT: u16 = 7;

/// Magic packet: 6 bytes of 0xFF followed by the hardware address 16 times
pub const MAGIC_PACKET_LEN: usize = 6 + 16 * 6;

/// API paths
pub const PATH_SCAN: &str = "/scan";
pub const PATH_HISTORY: &str = "/history";
pub const PATH_HISTORY_HASH: &str = "/history/hash";
pub const PATH_WAKE: &str = "/wake";
