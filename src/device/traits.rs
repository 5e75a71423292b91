//! Capability contracts for the Device Manager (§9: "interfaces over
//! inheritance"). Production wires real filesystem checks and a real
//! text-output parser; tests substitute fakes.

use async_trait::async_trait;

use crate::error::Result;

use super::types::{DeviceCapabilities, DeviceFormat};

#[async_trait]
pub trait DeviceChecker: Send + Sync {
    async fn exists(&self, path: &str) -> bool;
}

pub trait DeviceParser: Send + Sync {
    fn parse_device_info(&self, raw: &str) -> Result<DeviceCapabilities>;
    fn parse_device_formats(&self, raw: &str) -> Result<Vec<DeviceFormat>>;
}

/// Production checker: a device "exists" if its path is present in the
/// filesystem namespace.
pub struct FilesystemChecker;

#[async_trait]
impl DeviceChecker for FilesystemChecker {
    async fn exists(&self, path: &str) -> bool {
        tokio::fs::metadata(path).await.is_ok()
    }
}
