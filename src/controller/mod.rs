//! Controller (C8): composes the Router Client, Health Monitor, Device
//! Manager, Snapshot Engine, Recording Engine and Storage Monitor behind a
//! single lifecycle gate, and owns the process-wide active-recording
//! registry that enforces "at most one RECORDING session per (device,
//! use_case=recording)" (§4.8, §5) so the Recording Engine itself can stay
//! stateless about that conflict.

mod types;

pub use types::{ActiveRecording, RetentionPolicy};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::device::{Device, DeviceManager, DeviceStats};
use crate::error::{AppError, Result};
use crate::health::{HealthMetrics, HealthMonitor, HealthStatus};
use crate::recording::{FileListing, RecordingContinuity, RecordingEngine, RecordingInfo, RecordingOptions, RecordingSession, UseCase};
use crate::router::{RouterClient, RouterPath, RouterStream};
use crate::snapshot::{Snapshot, SnapshotEngine, SnapshotOptions, SnapshotSettings};
use crate::storage::{StorageMonitor, StorageSnapshot};

pub struct Controller {
    pub router: Arc<RouterClient>,
    pub health: Arc<HealthMonitor>,
    pub device: Arc<DeviceManager>,
    pub snapshot: Arc<SnapshotEngine>,
    pub recording: Arc<RecordingEngine>,
    pub storage: Arc<StorageMonitor>,
    active_recordings: RwLock<HashMap<String, ActiveRecording>>,
    retention_policy: RwLock<RetentionPolicy>,
    running: AtomicBool,
    cancel: RwLock<Option<CancellationToken>>,
}

impl Controller {
    pub fn new(
        router: Arc<RouterClient>,
        health: Arc<HealthMonitor>,
        device: Arc<DeviceManager>,
        snapshot: Arc<SnapshotEngine>,
        recording: Arc<RecordingEngine>,
        storage: Arc<StorageMonitor>,
    ) -> Arc<Self> {
        Arc::new(Self {
            router,
            health,
            device,
            snapshot,
            recording,
            storage,
            active_recordings: RwLock::new(HashMap::new()),
            retention_policy: RwLock::new(RetentionPolicy::default()),
            running: AtomicBool::new(false),
            cancel: RwLock::new(None),
        })
    }

    /// `set_retention_policy` (§4.9, admin only): updates the policy
    /// consulted by `cleanup_old_files` when a call omits `max_age`/`max_size`,
    /// and mirrors `max_size` onto the Storage Monitor's block threshold when
    /// given as a percentage-like guard.
    pub fn set_retention_policy(&self, policy: RetentionPolicy) {
        *self.retention_policy.write() = policy;
    }

    pub fn get_retention_policy(&self) -> RetentionPolicy {
        self.retention_policy.read().clone()
    }

    /// §5 startup ordering: C3 -> C4 -> C5 -> C11 -> C7 -> C6 -> C9. C3/C7/C6
    /// have no background loop of their own (they're called into directly),
    /// so only C4, C5 and C11 are actually started here; C9 is started by
    /// the caller once the Controller itself reports running.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AppError::AlreadyRunning("controller".to_string()));
        }

        let cancel = CancellationToken::new();
        self.health.start(cancel.child_token()).await?;
        self.device.start_monitoring(cancel.child_token()).await?;
        self.storage.start(cancel.child_token()).await?;
        *self.cancel.write() = Some(cancel);

        info!("controller started");
        Ok(())
    }

    /// Reverses startup order: C11 -> C5 -> C4.
    pub async fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(AppError::NotRunning("controller".to_string()));
        }

        if let Some(cancel) = self.cancel.write().take() {
            cancel.cancel();
        }
        self.storage.stop().ok();
        self.device.stop();
        self.health.stop().ok();

        info!("controller stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn require_running(&self) -> Result<()> {
        if !self.is_running() {
            return Err(AppError::NotRunning("controller".to_string()));
        }
        Ok(())
    }

    // --- Active-recording registry (§4.8) ---

    pub fn start_active_recording(&self, device: &str, session_id: &str, stream_name: &str) -> Result<()> {
        let mut table = self.active_recordings.write();
        if table.contains_key(device) {
            return Err(AppError::RecordingInProgress(device.to_string()));
        }
        table.insert(
            device.to_string(),
            ActiveRecording {
                device: device.to_string(),
                session_id: session_id.to_string(),
                stream_name: stream_name.to_string(),
            },
        );
        Ok(())
    }

    pub fn stop_active_recording(&self, device: &str) {
        self.active_recordings.write().remove(device);
    }

    pub fn is_device_recording(&self, device: &str) -> bool {
        self.active_recordings.read().contains_key(device)
    }

    pub fn get_active_recording(&self, device: &str) -> Option<ActiveRecording> {
        self.active_recordings.read().get(device).cloned()
    }

    pub fn get_active_recordings(&self) -> Vec<ActiveRecording> {
        self.active_recordings.read().values().cloned().collect()
    }

    pub fn get_session_id_by_device(&self, device: &str) -> Option<String> {
        self.active_recordings.read().get(device).map(|r| r.session_id.clone())
    }

    // --- Recording (delegated, with the at-most-one gate) ---

    pub async fn start_recording(&self, device: &str, options: &RecordingOptions) -> Result<RecordingSession> {
        self.require_running()?;

        let use_case = options.use_case.unwrap_or(UseCase::Recording);
        if use_case == UseCase::Recording && self.is_device_recording(device) {
            return Err(AppError::RecordingInProgress(device.to_string()));
        }

        let stream_name = DeviceManager::stream_name_for(device)?;
        let session = self.recording.start_recording(device, options).await?;

        if use_case == UseCase::Recording {
            // Between the check above and this insert another caller could
            // have raced in; the registry insert is the actual linearization
            // point (§5: "enforced by the active-recording registry, not by
            // the engine"), so a losing racer stops the session it just
            // started and reports the conflict to its own caller.
            if self.start_active_recording(device, &session.id, &stream_name).is_err() {
                let _ = self.recording.stop_recording(&session.id).await;
                return Err(AppError::RecordingInProgress(device.to_string()));
            }
        }

        Ok(session)
    }

    pub async fn stop_recording(&self, session_id: &str) -> Result<RecordingSession> {
        self.require_running()?;
        let session = self.recording.stop_recording(session_id).await?;
        if session.use_case == UseCase::Recording {
            self.stop_active_recording(&session.device);
        }
        Ok(session)
    }

    pub async fn stop_recording_by_device(&self, device: &str) -> Result<RecordingSession> {
        self.require_running()?;
        let session_id = self
            .get_session_id_by_device(device)
            .ok_or_else(|| AppError::FileNotFound(device.to_string()))?;
        self.stop_recording(&session_id).await
    }

    pub async fn get_recording_continuity(&self, session_id: &str) -> Option<RecordingContinuity> {
        self.recording.get_recording_continuity(session_id).await
    }

    pub async fn list_recordings(&self, limit: usize, offset: usize) -> Result<FileListing<RecordingInfo>> {
        self.require_running()?;
        self.recording.list_recordings(limit, offset).await
    }

    pub async fn get_recording_info(&self, filename: &str) -> Result<RecordingInfo> {
        self.require_running()?;
        self.recording.get_recording_info(filename).await
    }

    pub async fn delete_recording(&self, filename: &str) -> Result<()> {
        self.require_running()?;
        self.recording.delete_recording(filename).await
    }

    pub fn update_storage_thresholds(&self, warn_pct: f64, block_pct: f64) {
        self.recording.update_storage_thresholds(warn_pct, block_pct);
    }

    // --- Snapshot (delegated) ---

    pub async fn take_snapshot(&self, cancel: &CancellationToken, device: &str, output_prefix: &str, options: &SnapshotOptions) -> Result<Snapshot> {
        self.require_running()?;
        self.snapshot.take_snapshot(cancel, device, output_prefix, options).await
    }

    pub async fn get_snapshot(&self, id: &str) -> Option<Snapshot> {
        self.snapshot.get_snapshot(id).await
    }

    pub async fn list_snapshots(&self, limit: usize, offset: usize) -> (Vec<Snapshot>, usize) {
        self.snapshot.list_snapshots(limit, offset).await
    }

    pub async fn delete_snapshot(&self, id: &str) -> Result<()> {
        self.require_running()?;
        self.snapshot.delete_snapshot(id).await
    }

    pub fn get_snapshot_settings(&self) -> SnapshotSettings {
        self.snapshot.get_settings()
    }

    pub fn set_snapshot_settings(&self, settings: SnapshotSettings) {
        self.snapshot.set_settings(settings);
    }

    // --- Device (delegated) ---

    pub async fn get_device(&self, path: &str) -> Option<Device> {
        self.device.get_device(path).await
    }

    pub async fn get_connected_devices(&self) -> Vec<Device> {
        self.device.get_connected_devices().await
    }

    pub async fn get_device_stats(&self) -> DeviceStats {
        self.device.get_stats().await
    }

    // --- Router / health / storage (delegated, open question 3 resolved
    // below: `get_streams` propagates the Controller's own not-running gate,
    // so a caller can tell "service isn't up" apart from "running but the
    // Router is unreachable", which instead collapses to an empty list) ---

    pub async fn get_streams(&self) -> Result<Vec<RouterStream>> {
        self.require_running()?;
        match self.router.get_streams().await {
            Ok(streams) => Ok(streams),
            Err(AppError::RouterTimeout(_)) | Err(AppError::RouterHttp { .. }) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    pub async fn get_paths(&self) -> Result<Vec<RouterPath>> {
        self.require_running()?;
        self.router.get_paths().await
    }

    pub async fn get_health_status(&self) -> HealthStatus {
        self.health.get_status().await
    }

    pub fn get_health_metrics(&self) -> HealthMetrics {
        self.health.get_metrics()
    }

    pub async fn get_storage_info(&self) -> Result<StorageSnapshot> {
        self.require_running()?;
        self.storage.sample().await
    }

    pub async fn cleanup_old_files(&self, max_age: Option<std::time::Duration>, max_size: Option<usize>, dry_run: bool) -> Result<Vec<std::path::PathBuf>> {
        self.require_running()?;
        let policy = self.get_retention_policy();
        let max_age = max_age.or_else(|| policy.max_age_days.map(|d| std::time::Duration::from_secs(d as u64 * 86_400)));
        let max_size = max_size.or(policy.max_count);

        let mut removed = self.storage.cleanup_old_files(&self.recording_dir(), max_age, max_size, dry_run).await?;
        removed.extend(self.snapshot.cleanup_old_snapshots(max_age, max_size, dry_run).await?);
        Ok(removed)
    }

    fn recording_dir(&self) -> std::path::PathBuf {
        // Both engines are constructed from the same `recording`/`snapshots`
        // config roots; the Storage Monitor is the source of truth for
        // where those roots live since it already samples both.
        self.storage.recordings_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::process::ProcessRunner;
    use std::time::Duration;

    fn controller(dir: &std::path::Path) -> Arc<Controller> {
        let events = Arc::new(EventBus::new());
        let router = Arc::new(RouterClient::new("127.0.0.1", 9997, 0, Duration::from_millis(50), Duration::from_millis(100)));
        let health = Arc::new(HealthMonitor::new(
            crate::health::HealthMonitorConfig {
                health_check_interval: Duration::from_secs(30),
                failure_threshold: 3,
                recovery_threshold: 2,
                circuit_breaker_timeout: Duration::from_secs(5),
                backoff_multiplier: 2.0,
                backoff_jitter_low: 0.0,
                backoff_jitter_high: 0.0,
                max_backoff: Duration::from_secs(30),
                state_file: None,
            },
            router.clone(),
            events.clone(),
        ));
        let device = Arc::new(DeviceManager::new(
            crate::device::DeviceManagerConfig {
                device_range: vec![0],
                poll_interval: Duration::from_secs(30),
                detection_timeout: Duration::from_secs(2),
                enable_capability_detection: false,
                capability_timeout: Duration::from_secs(2),
                capability_retry_interval: Duration::from_secs(10),
                capability_max_retries: 1,
                probe_program: "true".to_string(),
            },
            Arc::new(crate::device::FilesystemChecker),
            Arc::new(ProcessRunner::new(4096)),
            Arc::new(crate::device::TextFormatParser),
            events.clone(),
        ));
        let storage = Arc::new(StorageMonitor::new(
            crate::storage::StorageMonitorConfig {
                recordings_dir: dir.join("recordings"),
                snapshots_dir: dir.join("snapshots"),
                sample_interval: Duration::from_secs(30),
                warn_pct: 80.0,
                block_pct: 95.0,
            },
            events.clone(),
        ));
        let recording = Arc::new(RecordingEngine::new(
            crate::recording::RecordingEngineConfig {
                output_dir: dir.join("recordings"),
                ffmpeg_binary: "ffmpeg".to_string(),
                default_format: "mp4".to_string(),
                default_segment_duration: Duration::from_secs(300),
                recording_start_timeout: Duration::from_secs(10),
                termination_timeout: Duration::from_secs(5),
                kill_timeout: Duration::from_secs(3),
                rotation_poll_interval: Duration::from_secs(5),
            },
            router.clone(),
            Arc::new(ProcessRunner::new(4096)),
            storage.clone(),
            events.clone(),
        ));
        let snapshot = Arc::new(SnapshotEngine::new(
            crate::snapshot::SnapshotEngineConfig {
                output_dir: dir.join("snapshots"),
                ffmpeg_binary: "ffmpeg".to_string(),
                snapshot_execution_timeout: Duration::from_secs(2),
                snapshot_retries: 0,
                rtsp_port: 8554,
                auto_start_streams: false,
                stream_readiness_timeout: Duration::from_millis(100),
                stream_readiness_check_interval: Duration::from_millis(20),
                default_settings: SnapshotSettings {
                    format: "jpg".to_string(),
                    quality: 85,
                    max_width: 1920,
                    max_height: 1080,
                    auto_resize: true,
                    compression: 2,
                },
            },
            router.clone(),
            Arc::new(ProcessRunner::new(4096)),
            events.clone(),
        ));

        Controller::new(router, health, device, snapshot, recording, storage)
    }

    #[tokio::test]
    async fn ops_fail_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let c = controller(dir.path());
        let result = c.list_recordings(10, 0).await;
        assert!(matches!(result, Err(AppError::NotRunning(_))));
    }

    #[tokio::test]
    async fn start_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let c = controller(dir.path());
        c.start().await.unwrap();
        assert!(matches!(c.start().await, Err(AppError::AlreadyRunning(_))));
        c.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_without_start_fails() {
        let dir = tempfile::tempdir().unwrap();
        let c = controller(dir.path());
        assert!(matches!(c.stop().await, Err(AppError::NotRunning(_))));
    }

    #[test]
    fn active_recording_registry_enforces_at_most_one() {
        let dir = tempfile::tempdir().unwrap();
        let c = controller(dir.path());
        c.start_active_recording("/dev/video0", "sess-1", "camera0").unwrap();
        assert!(c.is_device_recording("/dev/video0"));
        assert!(c.start_active_recording("/dev/video0", "sess-2", "camera0").is_err());
        c.stop_active_recording("/dev/video0");
        assert!(!c.is_device_recording("/dev/video0"));
    }

    #[tokio::test]
    async fn concurrent_registrations_on_same_device_leave_exactly_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let c = controller(dir.path());

        let a = Arc::clone(&c);
        let b = Arc::clone(&c);
        let (first, second) = tokio::join!(
            tokio::spawn(async move { a.start_active_recording("/dev/video0", "sess-a", "camera0") }),
            tokio::spawn(async move { b.start_active_recording("/dev/video0", "sess-b", "camera0") }),
        );
        let first = first.unwrap();
        let second = second.unwrap();

        assert!(first.is_ok() != second.is_ok(), "exactly one of two racing registrations should win");
        let loser = if first.is_err() { first.unwrap_err() } else { second.unwrap_err() };
        assert!(matches!(loser, AppError::RecordingInProgress(_)));
        assert!(c.is_device_recording("/dev/video0"));
    }

    #[tokio::test]
    async fn get_streams_returns_empty_when_router_unreachable_but_running() {
        let dir = tempfile::tempdir().unwrap();
        let c = controller(dir.path());
        c.start().await.unwrap();

        let streams = c.get_streams().await.unwrap();
        assert!(streams.is_empty());

        c.stop().await.unwrap();
    }
}
