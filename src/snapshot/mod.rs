//! Snapshot Engine (C6): single-shot image capture with a two-tier
//! fallback — fast path against an already-active Router stream, slow
//! path via a transient Router path created on demand.

mod types;

pub use types::{Snapshot, SnapshotOptions, SnapshotSettings, SnapshotStatus};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock as SyncRwLock;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::device::DeviceManager;
use crate::error::{AppError, Result};
use crate::events::{DomainEvent, EventBus};
use crate::process::ProcessRunner;
use crate::router::{PathSpec, RouterClient};

pub struct SnapshotEngineConfig {
    pub output_dir: PathBuf,
    pub ffmpeg_binary: String,
    pub snapshot_execution_timeout: Duration,
    pub snapshot_retries: u32,
    pub rtsp_port: u16,
    pub auto_start_streams: bool,
    pub stream_readiness_timeout: Duration,
    pub stream_readiness_check_interval: Duration,
    pub default_settings: SnapshotSettings,
}

pub struct SnapshotEngine {
    config: SnapshotEngineConfig,
    router: Arc<RouterClient>,
    process: Arc<ProcessRunner>,
    events: Arc<EventBus>,
    settings: SyncRwLock<SnapshotSettings>,
    snapshots: RwLock<HashMap<String, Snapshot>>,
}

impl SnapshotEngine {
    pub fn new(config: SnapshotEngineConfig, router: Arc<RouterClient>, process: Arc<ProcessRunner>, events: Arc<EventBus>) -> Self {
        let settings = config.default_settings.clone();
        Self {
            config,
            router,
            process,
            events,
            settings: SyncRwLock::new(settings),
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    pub fn get_settings(&self) -> SnapshotSettings {
        self.settings.read().clone()
    }

    pub fn set_settings(&self, settings: SnapshotSettings) {
        *self.settings.write() = settings;
    }

    /// §4.6's core algorithm.
    pub async fn take_snapshot(
        &self,
        cancel: &CancellationToken,
        device: &str,
        output_prefix: &str,
        options: &SnapshotOptions,
    ) -> Result<Snapshot> {
        let stream_name = DeviceManager::stream_name_for(device)?;
        let settings = self.get_settings().merged_with(options);
        let output_path = self.output_path(output_prefix, &settings.format);

        // Tier 1: capture against whatever is already published for this device.
        match self.try_tier(cancel, &stream_name, &output_path, &settings, 1).await {
            Ok(()) => return self.record_success(device, &output_path, 1).await,
            Err(tier1_err) => {
                if !self.config.auto_start_streams {
                    return Err(AppError::SnapshotFailed {
                        tier: 1,
                        reason: tier1_err.to_string(),
                    });
                }
                warn!(device, error = %tier1_err, "tier 1 snapshot failed, falling back to tier 2");
            }
        }

        // Tier 2: stand up a transient path, wait for readiness, retry the capture, tear down.
        self.events.publish(DomainEvent::SnapshotProgress {
            device: device.to_string(),
            tier: 2,
            message: "creating transient router path".to_string(),
        });

        self.router
            .create_path(&stream_name, &PathSpec { source: device.to_string(), source_on_demand: false })
            .await
            .map_err(|e| AppError::SnapshotFailed { tier: 2, reason: format!("path creation failed: {e}") })?;

        let teardown = |this: &Self, stream_name: String| async move {
            if let Err(e) = this.router.delete_path(&stream_name).await {
                warn!(stream_name, error = %e, "failed to tear down transient snapshot path");
            }
        };

        let ready = self.wait_for_readiness(cancel, device, &stream_name).await;
        if let Err(e) = ready {
            teardown(self, stream_name.clone()).await;
            return Err(AppError::SnapshotFailed { tier: 2, reason: e.to_string() });
        }

        let result = self.try_tier(cancel, &stream_name, &output_path, &settings, 2).await;
        teardown(self, stream_name).await;

        match result {
            Ok(()) => self.record_success(device, &output_path, 2).await,
            Err(e) => Err(AppError::SnapshotFailed { tier: 2, reason: e.to_string() }),
        }
    }

    async fn wait_for_readiness(&self, cancel: &CancellationToken, device: &str, stream_name: &str) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.config.stream_readiness_timeout;
        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(AppError::RouterTimeout(format!("stream {stream_name} did not become ready in time")));
            }
            match self.router.get_path(stream_name).await {
                Ok(path) if path.ready => return Ok(()),
                _ => {
                    self.events.publish(DomainEvent::SnapshotProgress {
                        device: device.to_string(),
                        tier: 2,
                        message: "waiting for stream readiness".to_string(),
                    });
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(AppError::Canceled),
                _ = tokio::time::sleep(self.config.stream_readiness_check_interval) => {}
            }
        }
    }

    async fn try_tier(&self, cancel: &CancellationToken, stream_name: &str, output_path: &PathBuf, settings: &SnapshotSettings, tier: u8) -> Result<()> {
        let url = format!("rtsp://127.0.0.1:{}/{}", self.config.rtsp_port, stream_name);
        let args = vec![
            "-y".to_string(),
            "-rtsp_transport".to_string(),
            "tcp".to_string(),
            "-i".to_string(),
            url,
            "-frames:v".to_string(),
            "1".to_string(),
            "-q:v".to_string(),
            settings.compression.to_string(),
            output_path.display().to_string(),
        ];

        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = self
                .process
                .execute(cancel, &self.config.ffmpeg_binary, &args, self.config.snapshot_execution_timeout)
                .await;
            match result {
                Ok(_) => return Ok(()),
                Err(e) if attempts > self.config.snapshot_retries => return Err(e),
                Err(e) => warn!(tier, attempt = attempts, error = %e, "snapshot capture attempt failed, retrying"),
            }
        }
    }

    async fn record_success(&self, device: &str, output_path: &PathBuf, tier: u8) -> Result<Snapshot> {
        let file_size = tokio::fs::metadata(output_path).await.map(|m| m.len()).unwrap_or(0);
        let snapshot = Snapshot {
            id: Uuid::new_v4().to_string(),
            device: device.to_string(),
            file_path: output_path.display().to_string(),
            created_time: chrono::Utc::now(),
            file_size,
            tier,
            status: SnapshotStatus::Completed,
        };
        self.snapshots.write().await.insert(snapshot.id.clone(), snapshot.clone());
        info!(device, tier, path = %snapshot.file_path, "snapshot captured");
        Ok(snapshot)
    }

    fn output_path(&self, prefix: &str, format: &str) -> PathBuf {
        let timestamp = chrono::Utc::now().format("%Y%m%d%H%M%S%3f");
        self.config.output_dir.join(format!("{prefix}_{timestamp}.{format}"))
    }

    pub async fn get_snapshot(&self, id: &str) -> Option<Snapshot> {
        self.snapshots.read().await.get(id).cloned()
    }

    pub async fn list_snapshots(&self, limit: usize, offset: usize) -> (Vec<Snapshot>, usize) {
        let mut all: Vec<Snapshot> = self.snapshots.read().await.values().cloned().collect();
        all.sort_by(|a, b| b.created_time.cmp(&a.created_time));
        let total = all.len();
        let page = all.into_iter().skip(offset).take(limit).collect();
        (page, total)
    }

    pub async fn delete_snapshot(&self, id: &str) -> Result<()> {
        let snapshot = self
            .snapshots
            .write()
            .await
            .remove(id)
            .ok_or_else(|| AppError::FileNotFound(id.to_string()))?;
        tokio::fs::remove_file(&snapshot.file_path).await.ok();
        Ok(())
    }

    /// `cleanup_old_snapshots(ctx, max_age, max_count)` — removes oldest
    /// files on disk beyond either bound and drops any matching in-memory
    /// entries. `dry_run` reports what would be removed without touching
    /// the filesystem or the in-memory table.
    pub async fn cleanup_old_snapshots(&self, max_age: Option<Duration>, max_count: Option<usize>, dry_run: bool) -> Result<Vec<PathBuf>> {
        let dir = self.config.output_dir.clone();
        let removed = tokio::task::spawn_blocking(move || -> Result<Vec<PathBuf>> {
            let mut entries: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
            let read_dir = match std::fs::read_dir(&dir) {
                Ok(rd) => rd,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(AppError::Io(e)),
            };
            for entry in read_dir.flatten() {
                if let Ok(meta) = entry.metadata() {
                    if meta.is_file() {
                        entries.push((entry.path(), meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH)));
                    }
                }
            }
            entries.sort_by_key(|(_, modified)| *modified);

            let now = std::time::SystemTime::now();
            let mut to_remove = Vec::new();
            if let Some(max_age) = max_age {
                for (path, modified) in &entries {
                    if now.duration_since(*modified).unwrap_or_default() > max_age {
                        to_remove.push(path.clone());
                    }
                }
            }
            if let Some(max_count) = max_count {
                if entries.len() > max_count {
                    for (path, _) in entries.iter().take(entries.len() - max_count) {
                        if !to_remove.contains(path) {
                            to_remove.push(path.clone());
                        }
                    }
                }
            }
            if !dry_run {
                for path in &to_remove {
                    let _ = std::fs::remove_file(path);
                }
            }
            Ok(to_remove)
        })
        .await
        .map_err(|e| AppError::Internal(format!("cleanup task panicked: {e}")))??;

        if !dry_run {
            let mut table = self.snapshots.write().await;
            table.retain(|_, s| !removed.iter().any(|p| p.display().to_string() == s.file_path));
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SnapshotSettings {
        SnapshotSettings {
            format: "jpg".to_string(),
            quality: 85,
            max_width: 1920,
            max_height: 1080,
            auto_resize: true,
            compression: 2,
        }
    }

    fn engine(dir: &std::path::Path) -> SnapshotEngine {
        SnapshotEngine::new(
            SnapshotEngineConfig {
                output_dir: dir.to_path_buf(),
                ffmpeg_binary: "ffmpeg".to_string(),
                snapshot_execution_timeout: Duration::from_secs(2),
                snapshot_retries: 0,
                rtsp_port: 8554,
                auto_start_streams: false,
                stream_readiness_timeout: Duration::from_millis(200),
                stream_readiness_check_interval: Duration::from_millis(20),
                default_settings: settings(),
            },
            Arc::new(RouterClient::new("127.0.0.1", 9997, 0, Duration::from_millis(50), Duration::from_millis(100))),
            Arc::new(ProcessRunner::new(4096)),
            Arc::new(EventBus::new()),
        )
    }

    #[test]
    fn merges_options_onto_defaults() {
        let merged = settings().merged_with(&SnapshotOptions {
            quality: Some(50),
            ..Default::default()
        });
        assert_eq!(merged.quality, 50);
        assert_eq!(merged.format, "jpg");
    }

    #[tokio::test]
    async fn rejects_invalid_device_path_before_any_io() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let cancel = CancellationToken::new();
        let result = engine.take_snapshot(&cancel, "/dev/sda", "snap", &SnapshotOptions::default()).await;
        assert!(matches!(result, Err(AppError::DeviceNotFound(_))));
    }

    #[tokio::test]
    async fn both_tiers_exhausted_yields_snapshot_failed() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        let cancel = CancellationToken::new();
        // No router running and auto_start_streams disabled: tier 1 fails immediately, no tier 2 attempted.
        let result = engine.take_snapshot(&cancel, "/dev/video0", "snap", &SnapshotOptions::default()).await;
        assert!(matches!(result, Err(AppError::SnapshotFailed { tier: 1, .. })));
    }

    #[tokio::test]
    async fn cleanup_respects_max_count() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..4 {
            std::fs::write(dir.path().join(format!("snap_{i}.jpg")), b"x").unwrap();
        }
        let engine = engine(dir.path());
        let removed = engine.cleanup_old_snapshots(None, Some(1), false).await.unwrap();
        assert_eq!(removed.len(), 3);
    }

    #[tokio::test]
    async fn cleanup_dry_run_does_not_delete() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("snap_0.jpg"), b"x").unwrap();
        let engine = engine(dir.path());

        let removed = engine.cleanup_old_snapshots(None, Some(0), true).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
