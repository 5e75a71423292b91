//! Device Manager (C5): enumerates the configured device-index range,
//! probes capabilities, and maintains per-device state.

mod parser;
mod traits;
mod types;

pub use parser::TextFormatParser;
pub use traits::{DeviceChecker, DeviceParser, FilesystemChecker};
pub use types::{Device, DeviceCapabilities, DeviceFormat, DeviceStats, DeviceStatus};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::events::{DomainEvent, EventBus};
use crate::process::ProcessRunner;

/// Tracks one extra poll cycle of "present but about to be removed" state
/// (§4.5: "present → absent: status DISCONNECTED; record retained for one
/// more cycle then removed").
struct TrackedDevice {
    device: Device,
    cycles_absent: u32,
    retries_this_presence: u32,
    last_probe_attempt: Option<Instant>,
}

pub struct DeviceManagerConfig {
    pub device_range: Vec<u32>,
    pub poll_interval: Duration,
    pub detection_timeout: Duration,
    pub enable_capability_detection: bool,
    pub capability_timeout: Duration,
    pub capability_retry_interval: Duration,
    pub capability_max_retries: u32,
    pub probe_program: String,
}

pub struct DeviceManager {
    config: DeviceManagerConfig,
    checker: Arc<dyn DeviceChecker>,
    runner: Arc<ProcessRunner>,
    parser: Arc<dyn DeviceParser>,
    events: Arc<EventBus>,
    devices: Arc<RwLock<HashMap<String, TrackedDevice>>>,
    running: AtomicBool,
}

impl DeviceManager {
    pub fn new(
        config: DeviceManagerConfig,
        checker: Arc<dyn DeviceChecker>,
        runner: Arc<ProcessRunner>,
        parser: Arc<dyn DeviceParser>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            checker,
            runner,
            parser,
            events,
            devices: Arc::new(RwLock::new(HashMap::new())),
            running: AtomicBool::new(false),
        }
    }

    fn device_path(index: u32) -> String {
        format!("/dev/video{index}")
    }

    /// One-shot enumeration over the full configured range. Respects
    /// cancellation: on cancel, returns `Canceled` and no partial result.
    pub async fn enumerate_devices(&self, cancel: &tokio_util::sync::CancellationToken) -> Result<Vec<Device>> {
        let mut out = Vec::new();
        for &index in &self.config.device_range {
            if cancel.is_cancelled() {
                return Err(AppError::Canceled);
            }
            let path = Self::device_path(index);
            if self.checker.exists(&path).await {
                match self.probe_capabilities(cancel, &path).await {
                    Ok((caps, formats)) => out.push(Device {
                        path: path.clone(),
                        name: caps.card.clone(),
                        status: DeviceStatus::Connected,
                        capabilities: Some(caps),
                        formats,
                        last_seen: Instant::now(),
                        last_error: None,
                    }),
                    Err(e) => out.push(Device {
                        path: path.clone(),
                        name: path.clone(),
                        status: DeviceStatus::Error,
                        capabilities: None,
                        formats: Vec::new(),
                        last_seen: Instant::now(),
                        last_error: Some(e.to_string()),
                    }),
                }
            }
        }
        Ok(out)
    }

    /// Probe one device's capabilities via the pluggable executor+parser.
    pub async fn probe_capabilities(
        &self,
        cancel: &tokio_util::sync::CancellationToken,
        path: &str,
    ) -> Result<(DeviceCapabilities, Vec<DeviceFormat>)> {
        if !self.checker.exists(path).await {
            return Err(AppError::DeviceNotFound(path.to_string()));
        }

        let info_out = self
            .runner
            .execute(
                cancel,
                &self.config.probe_program,
                &["-d".to_string(), path.to_string(), "--info".to_string()],
                self.config.capability_timeout,
            )
            .await?;
        let caps = self.parser.parse_device_info(&info_out)?;

        let formats_out = self
            .runner
            .execute(
                cancel,
                &self.config.probe_program,
                &[
                    "-d".to_string(),
                    path.to_string(),
                    "--list-formats-ext".to_string(),
                ],
                self.config.capability_timeout,
            )
            .await?;
        let formats = self.parser.parse_device_formats(&formats_out)?;

        Ok((caps, formats))
    }

    /// Start the background poller. Errors if already running.
    pub async fn start_monitoring(self: &Arc<Self>, cancel: tokio_util::sync::CancellationToken) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AppError::AlreadyRunning("device manager".to_string()));
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.config.poll_interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("device manager poll loop stopping");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = this.poll_once(&cancel).await {
                            warn!("device poll cycle failed: {e}");
                        }
                    }
                }
            }
            this.running.store(false, Ordering::SeqCst);
        });

        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn poll_once(&self, cancel: &tokio_util::sync::CancellationToken) -> Result<()> {
        let mut table = self.devices.write().await;
        let mut seen = std::collections::HashSet::new();

        for &index in &self.config.device_range {
            let path = Self::device_path(index);
            let exists = self.checker.exists(&path).await;
            seen.insert(path.clone());

            match (table.get_mut(&path), exists) {
                (None, true) => {
                    let (status, caps, formats, last_error, attempted) = if self.config.enable_capability_detection {
                        match self.probe_capabilities(cancel, &path).await {
                            Ok((caps, formats)) => (DeviceStatus::Connected, Some(caps), formats, None, true),
                            Err(e) => (DeviceStatus::Error, None, Vec::new(), Some(e.to_string()), true),
                        }
                    } else {
                        (DeviceStatus::Connected, None, Vec::new(), None, false)
                    };
                    let name = caps.as_ref().map(|c: &DeviceCapabilities| c.card.clone()).unwrap_or_else(|| path.clone());
                    table.insert(
                        path.clone(),
                        TrackedDevice {
                            device: Device {
                                path: path.clone(),
                                name,
                                status: status.clone(),
                                capabilities: caps,
                                formats,
                                last_seen: Instant::now(),
                                last_error,
                            },
                            cycles_absent: 0,
                            retries_this_presence: 0,
                            last_probe_attempt: attempted.then(Instant::now),
                        },
                    );
                    debug!(device = %path, "device appeared");
                    self.events.publish(DomainEvent::CameraStatusUpdate { device: path, status });
                }
                (Some(tracked), true) => {
                    tracked.cycles_absent = 0;
                    tracked.device.last_seen = Instant::now();
                    let due = tracked
                        .last_probe_attempt
                        .map(|at| at.elapsed() >= self.config.capability_retry_interval)
                        .unwrap_or(true);
                    if self.config.enable_capability_detection
                        && tracked.device.capabilities.is_none()
                        && tracked.retries_this_presence < self.config.capability_max_retries
                        && due
                    {
                        tracked.retries_this_presence += 1;
                        tracked.last_probe_attempt = Some(Instant::now());
                        if let Ok((caps, formats)) = self.probe_capabilities(cancel, &path).await {
                            tracked.device.capabilities = Some(caps);
                            tracked.device.formats = formats;
                            tracked.device.status = DeviceStatus::Connected;
                            tracked.device.last_error = None;
                            self.events.publish(DomainEvent::CameraStatusUpdate {
                                device: path,
                                status: DeviceStatus::Connected,
                            });
                        }
                    }
                }
                (Some(tracked), false) => {
                    if tracked.device.status != DeviceStatus::Disconnected {
                        tracked.device.status = DeviceStatus::Disconnected;
                        self.events.publish(DomainEvent::CameraStatusUpdate {
                            device: path.clone(),
                            status: DeviceStatus::Disconnected,
                        });
                    }
                    tracked.cycles_absent += 1;
                }
                (None, false) => {}
            }
        }

        let to_remove: Vec<String> = table
            .iter()
            .filter(|(_, t)| t.cycles_absent >= 1)
            .map(|(k, _)| k.clone())
            .collect();
        for path in to_remove {
            table.remove(&path);
            self.events.publish(DomainEvent::CameraRemoved { device: path });
        }

        Ok(())
    }

    pub async fn get_device(&self, path: &str) -> Option<Device> {
        self.devices.read().await.get(path).map(|t| t.device.clone())
    }

    pub async fn get_connected_devices(&self) -> Vec<Device> {
        self.devices
            .read()
            .await
            .values()
            .filter(|t| t.device.status == DeviceStatus::Connected)
            .map(|t| t.device.clone())
            .collect()
    }

    pub async fn get_stats(&self) -> DeviceStats {
        let table = self.devices.read().await;
        DeviceStats {
            total: table.len(),
            connected: table.values().filter(|t| t.device.status == DeviceStatus::Connected).count(),
            disconnected: table.values().filter(|t| t.device.status == DeviceStatus::Disconnected).count(),
            error: table.values().filter(|t| t.device.status == DeviceStatus::Error).count(),
        }
    }

    /// Map a device path to its Media Router stream name. Resolves Open
    /// Question 4: only the documented `/dev/videoN -> cameraN` convention
    /// is implemented; anything else is a typed resource error.
    pub fn stream_name_for(path: &str) -> Result<String> {
        path.strip_prefix("/dev/video")
            .filter(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
            .map(|rest| format!("camera{rest}"))
            .ok_or_else(|| AppError::DeviceNotFound(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct AlwaysExists;
    #[async_trait]
    impl DeviceChecker for AlwaysExists {
        async fn exists(&self, _path: &str) -> bool {
            true
        }
    }

    struct NeverExists;
    #[async_trait]
    impl DeviceChecker for NeverExists {
        async fn exists(&self, _path: &str) -> bool {
            false
        }
    }

    #[test]
    fn stream_name_mapping_follows_convention() {
        assert_eq!(DeviceManager::stream_name_for("/dev/video0").unwrap(), "camera0");
        assert_eq!(DeviceManager::stream_name_for("/dev/video12").unwrap(), "camera12");
        assert!(DeviceManager::stream_name_for("/dev/sda").is_err());
        assert!(DeviceManager::stream_name_for("/dev/video").is_err());
    }

    #[tokio::test]
    async fn enumerate_respects_cancellation() {
        let cancel = tokio_util::sync::CancellationToken::new();
        cancel.cancel();

        let config = DeviceManagerConfig {
            device_range: vec![0, 1],
            poll_interval: Duration::from_secs(1),
            detection_timeout: Duration::from_secs(1),
            enable_capability_detection: false,
            capability_timeout: Duration::from_secs(1),
            capability_retry_interval: Duration::from_secs(1),
            capability_max_retries: 1,
            probe_program: "true".to_string(),
        };
        let manager = DeviceManager::new(
            config,
            Arc::new(AlwaysExists),
            Arc::new(ProcessRunner::new(4096)),
            Arc::new(TextFormatParser),
            Arc::new(EventBus::new()),
        );

        let result = manager.enumerate_devices(&cancel).await;
        assert!(matches!(result, Err(AppError::Canceled)));
    }

    #[tokio::test]
    async fn probe_on_missing_device_is_not_found() {
        let config = DeviceManagerConfig {
            device_range: vec![0],
            poll_interval: Duration::from_secs(1),
            detection_timeout: Duration::from_secs(1),
            enable_capability_detection: true,
            capability_timeout: Duration::from_secs(1),
            capability_retry_interval: Duration::from_secs(1),
            capability_max_retries: 1,
            probe_program: "true".to_string(),
        };
        let manager = DeviceManager::new(
            config,
            Arc::new(NeverExists),
            Arc::new(ProcessRunner::new(4096)),
            Arc::new(TextFormatParser),
            Arc::new(EventBus::new()),
        );
        let cancel = tokio_util::sync::CancellationToken::new();
        let result = manager.probe_capabilities(&cancel, "/dev/video0").await;
        assert!(matches!(result, Err(AppError::DeviceNotFound(_))));
    }
}
