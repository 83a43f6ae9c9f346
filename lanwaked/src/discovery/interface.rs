//! Probe interface selection.
//!
//! There is no portable "interface of the default route" lookup here, so the
//! choice is a heuristic: the first configured name for this platform that
//! exists on the host, else whatever interface the host lists first. It picks
//! a live interface, not necessarily the one facing the requested segment.

use std::collections::HashMap;
use crate::error::{Error, Result};

/// Platform tag used to key the preference table
pub fn current_platform() -> &'static str {
    std::env::consts::OS
}

pub fn select_interface(
    available: &[String],
    platform: &str,
    preferences: &HashMap<String, Vec<String>>,
) -> Result<String> {
    let preferred = preferences.get(platform).map(Vec::as_slice).unwrap_or(&[]);

    if let Some(name) = preferred.iter().find(|name| available.contains(name)) {
        return Ok(name.clone());
    }

    available.first().cloned().ok_or(Error::NoInterfaceAvailable)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn table() -> HashMap<String, Vec<String>> {
        HashMap::from([
            ("linux".to_string(), names(&["eth0", "ens33", "wlan0"])),
            ("macos".to_string(), names(&["en0"])),
        ])
    }

    #[test]
    fn test_preference_order_wins_over_host_order() {
        let available = names(&["wlan0", "docker0", "ens33"]);
        assert_eq!(select_interface(&available, "linux", &table()).unwrap(), "ens33");
    }

    #[test]
    fn test_falls_back_to_first_host_interface() {
        let available = names(&["br-lan", "wlan1"]);
        assert_eq!(select_interface(&available, "linux", &table()).unwrap(), "br-lan");
    }

    #[test]
    fn test_unknown_platform_uses_fallback() {
        let available = names(&["em0", "eth0"]);
        assert_eq!(select_interface(&available, "freebsd", &table()).unwrap(), "em0");
    }

    #[test]
    fn test_no_interfaces() {
        let result = select_interface(&[], "linux", &table());
        assert!(matches!(result, Err(Error::NoInterfaceAvailable)));
    }
}
