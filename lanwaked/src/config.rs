use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use serde::Deserialize;
use anyhow::{Context, Result};
use shared::protocol::WOL_PORT;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub wake: WakeConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Which discovery engine serves a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Raw ARP only; a refused channel yields an empty result
    Arp,
    /// Ping sweep plus neighbor cache only
    Sweep,
    /// ARP, falling back to the sweep when the raw channel is refused
    Auto,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_strategy")]
    pub strategy: Strategy,
    /// Window for collecting ARP replies
    #[serde(default = "default_arp_timeout")]
    pub arp_timeout_ms: u64,
    /// Overall budget for one scan; whatever was collected by then is returned
    #[serde(default = "default_scan_deadline")]
    pub scan_deadline_secs: u64,
    #[serde(default = "default_hostname_timeout")]
    pub hostname_timeout_ms: u64,
    #[serde(default = "default_resolver_concurrency")]
    pub resolver_concurrency: usize,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_secs: u64,
    #[serde(default = "default_sweep_concurrency")]
    pub sweep_concurrency: usize,
    /// Shortest prefix accepted for a scan; wider segments are rejected
    #[serde(default = "default_min_prefix_len")]
    pub min_prefix_len: u8,
    /// Platform tag (as in `std::env::consts::OS`) -> preferred interface names, in order
    #[serde(default = "default_interfaces")]
    pub interfaces: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WakeConfig {
    #[serde(default = "default_broadcast_addr")]
    pub broadcast_addr: Ipv4Addr,
    #[serde(default = "default_wake_ports")]
    pub ports: Vec<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Directory for the rotated log file; stdout only when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

fn default_strategy() -> Strategy {
    Strategy::Auto
}

fn default_arp_timeout() -> u64 {
    10_000
}

fn default_scan_deadline() -> u64 {
    60
}

fn default_hostname_timeout() -> u64 {
    2000
}

fn default_resolver_concurrency() -> usize {
    16
}

fn default_ping_timeout() -> u64 {
    1
}

fn default_sweep_concurrency() -> usize {
    32
}

fn default_min_prefix_len() -> u8 {
    16
}

fn default_interfaces() -> HashMap<String, Vec<String>> {
    let table = [
        ("linux", &["eth0", "ens33", "enp0s3", "wlan0", "wlp2s0"][..]),
        ("macos", &["en0", "en1"][..]),
        ("windows", &["Ethernet", "Wi-Fi"][..]),
    ];
    table
        .iter()
        .map(|(platform, names)| {
            (platform.to_string(), names.iter().map(|n| n.to_string()).collect())
        })
        .collect()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/lanwake/devices.db")
}

fn default_broadcast_addr() -> Ipv4Addr {
    Ipv4Addr::BROADCAST
}

fn default_wake_ports() -> Vec<u16> {
    vec![WOL_PORT]
}

fn default_listen() -> String {
    "0.0.0.0:5100".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            arp_timeout_ms: default_arp_timeout(),
            scan_deadline_secs: default_scan_deadline(),
            hostname_timeout_ms: default_hostname_timeout(),
            resolver_concurrency: default_resolver_concurrency(),
            ping_timeout_secs: default_ping_timeout(),
            sweep_concurrency: default_sweep_concurrency(),
            min_prefix_len: default_min_prefix_len(),
            interfaces: default_interfaces(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            broadcast_addr: default_broadcast_addr(),
            ports: default_wake_ports(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_files: default_max_log_files(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }
}
