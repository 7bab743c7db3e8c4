use crate::agent::types::{NetworkInterface, SystemInfo};
use std::net::IpAddr;
use sysinfo::{Networks, System};

const BYTES_IN_GB: f64 = 1024.0 * 1024.0 * 1024.0;
const SECONDS_IN_HOUR: f64 = 3600.0;

/// Source of host snapshots; called on auth, every heartbeat and `get_info`
pub trait Telemetry: Send + Sync + 'static {
    fn snapshot(&self) -> SystemInfo;
}

/// Reads facts from the running host
#[derive(Debug, Clone, Copy, Default)]
pub struct HostTelemetry;

impl HostTelemetry {
    pub fn new() -> Self {
        Self
    }
}

impl Telemetry for HostTelemetry {
    fn snapshot(&self) -> SystemInfo {
        let mut system = System::new();
        system.refresh_memory();

        SystemInfo {
            hostname: host_name(),
            platform: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            cpus: num_cpus::get(),
            memory_total: format_gb(system.total_memory()),
            memory_free: format_gb(system.available_memory()),
            uptime: format_hours(System::uptime()),
            network: network_interfaces(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

fn host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .or_else(System::host_name)
        .unwrap_or_else(|| "unknown".to_string())
}

/// Non-loopback IPv4 addresses, one entry per address
pub fn network_interfaces() -> Vec<NetworkInterface> {
    let networks = Networks::new_with_refreshed_list();
    let mut result: Vec<NetworkInterface> = Vec::new();

    for (name, data) in networks.list() {
        for network in data.ip_networks() {
            if let IpAddr::V4(ip) = network.addr {
                if ip.is_loopback() {
                    continue;
                }
                result.push(NetworkInterface {
                    interface: name.clone(),
                    ip: ip.to_string(),
                    mac: data.mac_address().to_string(),
                });
            }
        }
    }

    result.sort_by(|a, b| a.interface.cmp(&b.interface).then(a.ip.cmp(&b.ip)));
    result
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn format_gb(bytes: u64) -> String {
    format!("{} GB", round2(bytes as f64 / BYTES_IN_GB))
}

pub fn format_hours(seconds: u64) -> String {
    format!("{} hours", round2(seconds as f64 / SECONDS_IN_HOUR))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_gb_rounds_to_two_places() {
        assert_eq!(format_gb(8_226_000_000), "7.66 GB");
        assert_eq!(format_gb(16 * 1024 * 1024 * 1024), "16 GB");
        assert_eq!(format_gb(0), "0 GB");
    }

    #[test]
    fn test_format_hours() {
        assert_eq!(format_hours(5400), "1.5 hours");
        assert_eq!(format_hours(3600 * 24), "24 hours");
        assert_eq!(format_hours(100), "0.03 hours");
    }

    #[test]
    fn test_snapshot_has_host_facts() {
        let info = HostTelemetry::new().snapshot();

        assert!(!info.hostname.is_empty());
        assert_eq!(info.platform, std::env::consts::OS);
        assert!(info.cpus >= 1);
        assert!(info.memory_total.ends_with(" GB"));
        assert!(info.timestamp > 0);
        assert!(info
            .network
            .iter()
            .all(|n| !n.ip.starts_with("127.") && !n.ip.contains(':')));
    }
}
