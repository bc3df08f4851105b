//! Host network interface inspection

use crate::errors::ConnectionType;
use sysinfo::Networks;

/// Classify an interface by its OS name.
pub fn classify_interface(name: &str) -> ConnectionType {
    let name = name.to_ascii_lowercase();
    if name.starts_with("wl") || name.contains("wi-fi") || name.contains("wifi") {
        ConnectionType::Wifi
    } else if ["wwan", "rmnet", "pdp_ip", "ccmni", "ppp"]
        .iter()
        .any(|prefix| name.starts_with(prefix))
    {
        ConnectionType::Cellular
    } else if name.starts_with("eth") || name.starts_with("en") {
        ConnectionType::Ethernet
    } else {
        ConnectionType::Unknown
    }
}

fn is_loopback(name: &str) -> bool {
    name == "lo" || name.starts_with("lo0") || name.to_ascii_lowercase().contains("loopback")
}

/// Best-effort connection type: the non-loopback interface that has moved the most bytes.
pub fn detect_connection_type() -> ConnectionType {
    let networks = Networks::new_with_refreshed_list();
    networks
        .list()
        .iter()
        .filter(|(name, _)| !is_loopback(name))
        .map(|(name, data)| (name, data.total_received() + data.total_transmitted()))
        .filter(|(_, bytes)| *bytes > 0)
        .max_by_key(|(_, bytes)| *bytes)
        .map(|(name, _)| classify_interface(name))
        .unwrap_or_default()
}
