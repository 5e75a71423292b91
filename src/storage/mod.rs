//! Storage Monitor (C11): periodic filesystem usage sampling for the
//! recordings/snapshots roots, warn/block thresholds, and age/size-based
//! cleanup primitives shared by the Recording Engine's retention sweep and
//! the `cleanup_old_files` RPC method.

mod types;

pub use types::StorageSnapshot;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::events::{DomainEvent, EventBus};

pub struct StorageMonitorConfig {
    pub recordings_dir: PathBuf,
    pub snapshots_dir: PathBuf,
    pub sample_interval: Duration,
    pub warn_pct: f64,
    pub block_pct: f64,
}

struct Thresholds {
    warn_pct: f64,
    block_pct: f64,
}

pub struct StorageMonitor {
    config: StorageMonitorConfig,
    events: Arc<EventBus>,
    thresholds: RwLock<Thresholds>,
    running: AtomicBool,
}

impl StorageMonitor {
    pub fn new(config: StorageMonitorConfig, events: Arc<EventBus>) -> Self {
        let thresholds = Thresholds {
            warn_pct: config.warn_pct,
            block_pct: config.block_pct,
        };
        Self {
            config,
            events,
            thresholds: RwLock::new(thresholds),
            running: AtomicBool::new(false),
        }
    }

    pub async fn start(self: &Arc<Self>, cancel: CancellationToken) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AppError::AlreadyRunning("storage monitor".to_string()));
        }

        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.sample_interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("storage monitor loop stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        match this.sample().await {
                            Ok(snap) if snap.low_space_warning => {
                                this.events.publish(DomainEvent::StorageWarning {
                                    usage_percentage: snap.usage_percentage,
                                    path: this.config.recordings_dir.display().to_string(),
                                });
                            }
                            Ok(_) => {}
                            Err(e) => warn!(error = %e, "storage sampling failed"),
                        }
                    }
                }
            }
            this.running.store(false, Ordering::SeqCst);
        });
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(AppError::NotRunning("storage monitor".to_string()));
        }
        Ok(())
    }

    /// One-shot usage snapshot (§4.11). Disk totals come from the
    /// filesystem backing the recordings root; recordings/snapshots sizes
    /// are separately walked so either directory may live on a different
    /// mount without skewing the other's reported size.
    pub async fn sample(&self) -> Result<StorageSnapshot> {
        let recordings_dir = self.config.recordings_dir.clone();
        let snapshots_dir = self.config.snapshots_dir.clone();
        let thresholds = {
            let t = self.thresholds.read();
            (t.warn_pct, t.block_pct)
        };

        tokio::task::spawn_blocking(move || Self::sample_blocking(&recordings_dir, &snapshots_dir, thresholds.0))
            .await
            .map_err(|e| AppError::Internal(format!("storage sampling task panicked: {e}")))?
    }

    fn sample_blocking(recordings_dir: &Path, snapshots_dir: &Path, warn_pct: f64) -> Result<StorageSnapshot> {
        let (total_space, available_space) = disk_usage(recordings_dir)?;
        let used_space = total_space.saturating_sub(available_space);
        let usage_percentage = if total_space == 0 {
            0.0
        } else {
            (used_space as f64 / total_space as f64) * 100.0
        };

        let recordings_size = directory_size(recordings_dir);
        let snapshots_size = directory_size(snapshots_dir);

        Ok(StorageSnapshot {
            total_space,
            used_space,
            available_space,
            usage_percentage,
            recordings_size,
            snapshots_size,
            low_space_warning: usage_percentage >= warn_pct,
        })
    }

    /// Storage guard consulted by the Recording Engine before starting a
    /// session (§4.7): `Ok(())` to proceed, `Err(StorageCritical)` at or
    /// above the block threshold.
    pub async fn check_guard(&self) -> Result<()> {
        let snap = self.sample().await?;
        let block_pct = self.thresholds.read().block_pct;
        if snap.usage_percentage >= block_pct {
            return Err(AppError::StorageCritical);
        }
        if snap.low_space_warning {
            warn!(usage_percentage = snap.usage_percentage, "storage usage above warn threshold, proceeding");
        }
        Ok(())
    }

    pub fn recordings_dir(&self) -> PathBuf {
        self.config.recordings_dir.clone()
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.config.snapshots_dir.clone()
    }

    pub fn update_thresholds(&self, warn_pct: f64, block_pct: f64) {
        let mut t = self.thresholds.write();
        t.warn_pct = warn_pct;
        t.block_pct = block_pct;
    }

    /// Remove files older than `max_age` or beyond `max_count` (oldest
    /// first) under `dir`. Returns the paths removed. `dry_run` reports
    /// what would be removed without touching the filesystem.
    pub async fn cleanup_old_files(&self, dir: &Path, max_age: Option<Duration>, max_count: Option<usize>, dry_run: bool) -> Result<Vec<PathBuf>> {
        let dir = dir.to_path_buf();
        tokio::task::spawn_blocking(move || Self::cleanup_blocking(&dir, max_age, max_count, dry_run))
            .await
            .map_err(|e| AppError::Internal(format!("cleanup task panicked: {e}")))?
    }

    fn cleanup_blocking(dir: &Path, max_age: Option<Duration>, max_count: Option<usize>, dry_run: bool) -> Result<Vec<PathBuf>> {
        let mut entries: Vec<(PathBuf, SystemTime)> = Vec::new();
        let read_dir = match std::fs::read_dir(dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::Io(e)),
        };
        for entry in read_dir.flatten() {
            if let Ok(meta) = entry.metadata() {
                if meta.is_file() {
                    let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                    entries.push((entry.path(), modified));
                }
            }
        }
        entries.sort_by_key(|(_, modified)| *modified);

        let now = SystemTime::now();
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
                let overflow = entries.len() - max_count;
                for (path, _) in entries.iter().take(overflow) {
                    if !to_remove.contains(path) {
                        to_remove.push(path.clone());
                    }
                }
            }
        }

        if !dry_run {
            for path in &to_remove {
                if let Err(e) = std::fs::remove_file(path) {
                    warn!(path = %path.display(), error = %e, "failed to remove file during cleanup");
                }
            }
        }

        Ok(to_remove)
    }
}

fn disk_usage(path: &Path) -> Result<(u64, u64)> {
    let stat = nix::sys::statvfs::statvfs(path).map_err(|e| AppError::Internal(format!("statvfs failed for {}: {e}", path.display())))?;
    let block_size = stat.fragment_size() as u64;
    let total = stat.blocks() as u64 * block_size;
    let available = stat.blocks_available() as u64 * block_size;
    Ok((total, available))
}

fn directory_size(dir: &Path) -> u64 {
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return 0;
    };
    read_dir
        .flatten()
        .filter_map(|entry| entry.metadata().ok())
        .filter(|meta| meta.is_file())
        .map(|meta| meta.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &Path) -> StorageMonitorConfig {
        StorageMonitorConfig {
            recordings_dir: dir.join("recordings"),
            snapshots_dir: dir.join("snapshots"),
            sample_interval: Duration::from_secs(30),
            warn_pct: 80.0,
            block_pct: 95.0,
        }
    }

    #[tokio::test]
    async fn samples_directory_sizes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("recordings")).unwrap();
        std::fs::create_dir_all(dir.path().join("snapshots")).unwrap();
        std::fs::write(dir.path().join("recordings/a.mp4"), vec![0u8; 1024]).unwrap();

        let monitor = StorageMonitor::new(config(dir.path()), Arc::new(EventBus::new()));
        let snap = monitor.sample().await.unwrap();
        assert_eq!(snap.recordings_size, 1024);
        assert_eq!(snap.snapshots_size, 0);
        assert!(snap.total_space > 0);
    }

    #[tokio::test]
    async fn cleanup_respects_max_count() {
        let dir = tempfile::tempdir().unwrap();
        let recordings = dir.path().join("recordings");
        std::fs::create_dir_all(&recordings).unwrap();
        for i in 0..5 {
            std::fs::write(recordings.join(format!("f{i}.mp4")), b"x").unwrap();
        }

        let monitor = StorageMonitor::new(config(dir.path()), Arc::new(EventBus::new()));
        let removed = monitor.cleanup_old_files(&recordings, None, Some(2), false).await.unwrap();
        assert_eq!(removed.len(), 3);
        assert_eq!(std::fs::read_dir(&recordings).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn cleanup_dry_run_does_not_delete() {
        let dir = tempfile::tempdir().unwrap();
        let recordings = dir.path().join("recordings");
        std::fs::create_dir_all(&recordings).unwrap();
        std::fs::write(recordings.join("f0.mp4"), b"x").unwrap();

        let monitor = StorageMonitor::new(config(dir.path()), Arc::new(EventBus::new()));
        let removed = monitor.cleanup_old_files(&recordings, None, Some(0), true).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(std::fs::read_dir(&recordings).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn guard_fails_at_block_threshold() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("recordings")).unwrap();
        std::fs::create_dir_all(dir.path().join("snapshots")).unwrap();
        let mut cfg = config(dir.path());
        cfg.block_pct = 0.0;
        let monitor = StorageMonitor::new(cfg, Arc::new(EventBus::new()));
        assert!(matches!(monitor.check_guard().await, Err(AppError::StorageCritical)));
    }

    #[tokio::test]
    async fn start_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("recordings")).unwrap();
        std::fs::create_dir_all(dir.path().join("snapshots")).unwrap();
        let monitor = Arc::new(StorageMonitor::new(config(dir.path()), Arc::new(EventBus::new())));
        let cancel = CancellationToken::new();
        monitor.start(cancel.clone()).await.unwrap();
        assert!(matches!(monitor.start(cancel.clone()).await, Err(AppError::AlreadyRunning(_))));
        cancel.cancel();
    }
}
