use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;
pub const RECONNECT_DELAY_SECS: u64 = 10;
pub const EXEC_TIMEOUT_SECS: u64 = 30;

/// Timing knobs for the connection manager and dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentSettings {
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
    pub exec_timeout: Duration,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
            reconnect_delay: Duration::from_secs(RECONNECT_DELAY_SECS),
            exec_timeout: Duration::from_secs(EXEC_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// One network interface as reported in a telemetry snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkInterface {
    pub interface: String,
    pub ip: String,
    pub mac: String,
}

/// Point-in-time host facts sent on auth, on every heartbeat and for `get_info`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemInfo {
    pub hostname: String,
    pub platform: String,
    pub arch: String,
    pub cpus: usize,
    pub memory_total: String,
    pub memory_free: String,
    pub uptime: String,
    pub network: Vec<NetworkInterface>,
    /// Milliseconds since the unix epoch
    pub timestamp: i64,
}
