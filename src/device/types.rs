use std::time::Instant;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceStatus {
    Connected,
    Disconnected,
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub driver: String,
    pub card: String,
    pub bus: String,
    pub version: String,
    pub capabilities: Vec<String>,
    pub device_caps: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceFormat {
    pub pixel_format: String,
    pub width: u32,
    pub height: u32,
    pub frame_rates: Vec<f64>,
}

/// Device (§3). `last_seen` is process-local wall-clock state, not
/// serialized to clients — RPC responses project a subset of this struct.
#[derive(Debug, Clone)]
pub struct Device {
    pub path: String,
    pub name: String,
    pub status: DeviceStatus,
    pub capabilities: Option<DeviceCapabilities>,
    pub formats: Vec<DeviceFormat>,
    pub last_seen: Instant,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceStats {
    pub total: usize,
    pub connected: usize,
    pub disconnected: usize,
    pub error: usize,
}
