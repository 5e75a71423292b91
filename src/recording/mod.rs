//! Recording Engine (C7): long-running recording sessions with
//! segmentation, size/duration rotation, per-use-case retention, and a
//! storage guard consulted before every start.

mod types;

pub use types::{FileListing, Quality, RecordingContinuity, RecordingInfo, RecordingOptions, RecordingSession, SessionStatus, UseCase};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, RecordingError, Result};
use crate::events::{DomainEvent, EventBus};
use crate::process::{ProcessHandle, ProcessRunner};
use crate::router::{PathSpec, RouterClient};
use crate::storage::StorageMonitor;

pub struct RecordingEngineConfig {
    pub output_dir: PathBuf,
    pub ffmpeg_binary: String,
    pub default_format: String,
    pub default_segment_duration: Duration,
    pub recording_start_timeout: Duration,
    pub termination_timeout: Duration,
    pub kill_timeout: Duration,
    /// How often the rotation watcher polls the current segment's size /
    /// elapsed duration for non-segmented (plain) recordings.
    pub rotation_poll_interval: Duration,
}

struct SessionSlot {
    session: RecordingSession,
    handle: ProcessHandle,
    cancel: CancellationToken,
}

pub struct RecordingEngine {
    config: RecordingEngineConfig,
    router: Arc<RouterClient>,
    process: Arc<ProcessRunner>,
    storage: Arc<StorageMonitor>,
    events: Arc<EventBus>,
    sessions: Arc<RwLock<HashMap<String, SessionSlot>>>,
    continuity: Arc<RwLock<HashMap<String, RecordingContinuity>>>,
}

impl RecordingEngine {
    pub fn new(config: RecordingEngineConfig, router: Arc<RouterClient>, process: Arc<ProcessRunner>, storage: Arc<StorageMonitor>, events: Arc<EventBus>) -> Self {
        Self {
            config,
            router,
            process,
            storage,
            events,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            continuity: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn start_recording(&self, device: &str, options: &RecordingOptions) -> Result<RecordingSession> {
        self.start_recording_internal(device, options, None).await
    }

    pub async fn start_recording_with_segments(&self, device: &str, options: &RecordingOptions, segment_duration: Duration, max_segments: u32) -> Result<RecordingSession> {
        let mut options = options.clone();
        options.segment_duration_secs = Some(segment_duration.as_secs());
        options.max_segments = Some(max_segments);
        self.start_recording_internal(device, &options, Some((segment_duration, max_segments))).await
    }

    async fn start_recording_internal(&self, device: &str, options: &RecordingOptions, segmented: Option<(Duration, u32)>) -> Result<RecordingSession> {
        self.storage.check_guard().await?;

        let use_case = options.use_case.unwrap_or(UseCase::Recording);
        let defaults = use_case.defaults();
        let quality = options.quality.unwrap_or_default();
        let format = options.format.clone().unwrap_or_else(|| self.config.default_format.clone());
        let continuity_id = Uuid::new_v4().to_string();
        let session_id = Uuid::new_v4().to_string();

        self.ensure_router_path(device).await.map_err(|e| RecordingError::new(&session_id, device, "start_recording", e))?;

        let file_path = match segmented {
            Some(_) => self.segment_path(&continuity_id, &format, Some(0)),
            None => self.segment_path(&continuity_id, &format, None),
        };

        let args = match segmented {
            Some((segment_duration, _)) => self.segmented_ffmpeg_args(device, &continuity_id, &format, segment_duration, options.audio.unwrap_or(false)),
            None => self.plain_ffmpeg_args(device, &file_path, options.duration_secs, options.audio.unwrap_or(false)),
        };

        let handle = self
            .process
            .spawn(&self.config.ffmpeg_binary, &args)
            .map_err(|e| RecordingError::new(&session_id, device, "start_recording", e))?;

        let session = RecordingSession {
            id: session_id.clone(),
            device: device.to_string(),
            continuity_id: continuity_id.clone(),
            file_path: file_path.display().to_string(),
            start_time: chrono::Utc::now(),
            status: SessionStatus::Recording,
            use_case,
            priority: defaults.priority,
            auto_cleanup: defaults.auto_cleanup,
            retention_days: defaults.retention_days,
            quality,
            max_duration: options.duration_secs.map(Duration::from_secs).or(defaults.max_duration),
            auto_rotate: segmented.is_none() && defaults.auto_rotate,
            rotation_size: defaults.rotation_size,
            segment_count: 1,
        };

        self.continuity.write().await.insert(
            continuity_id.clone(),
            RecordingContinuity {
                continuity_id: continuity_id.clone(),
                device: device.to_string(),
                segment_paths: vec![session.file_path.clone()],
                last_segment_index: 0,
            },
        );

        let cancel = CancellationToken::new();
        self.sessions.write().await.insert(
            session_id.clone(),
            SessionSlot {
                session: session.clone(),
                handle,
                cancel: cancel.clone(),
            },
        );

        match segmented {
            None if session.auto_rotate || session.max_duration.is_some() => {
                self.spawn_rotation_watcher(session_id.clone(), cancel);
            }
            Some((_, max_segments)) => {
                self.spawn_segment_overflow_watcher(continuity_id.clone(), format.clone(), max_segments, cancel);
            }
            _ => {}
        }

        self.events.publish(DomainEvent::RecordingStatusUpdate {
            session_id: session.id.clone(),
            device: session.device.clone(),
            status: session.status,
        });
        info!(session_id = %session.id, device, "recording started");

        Ok(session)
    }

    async fn ensure_router_path(&self, device: &str) -> Result<()> {
        let stream_name = crate::device::DeviceManager::stream_name_for(device)?;
        if self.router.get_path(&stream_name).await.is_ok() {
            return Ok(());
        }
        match self.router.create_path(&stream_name, &PathSpec { source: device.to_string(), source_on_demand: false }).await {
            Ok(()) => Ok(()),
            Err(AppError::RouterHttp { status, .. }) if status == 409 => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn plain_ffmpeg_args(&self, device: &str, output: &std::path::Path, duration_secs: Option<u64>, audio: bool) -> Vec<String> {
        let mut args = vec!["-y".to_string(), "-f".to_string(), "v4l2".to_string(), "-i".to_string(), device.to_string()];
        if !audio {
            args.push("-an".to_string());
        }
        if let Some(secs) = duration_secs {
            args.push("-t".to_string());
            args.push(secs.to_string());
        }
        args.push(output.display().to_string());
        args
    }

    fn segmented_ffmpeg_args(&self, device: &str, continuity_id: &str, format: &str, segment_duration: Duration, audio: bool) -> Vec<String> {
        let mut args = vec!["-y".to_string(), "-f".to_string(), "v4l2".to_string(), "-i".to_string(), device.to_string()];
        if !audio {
            args.push("-an".to_string());
        }
        args.push("-f".to_string());
        args.push("segment".to_string());
        args.push("-segment_time".to_string());
        args.push(segment_duration.as_secs().to_string());
        args.push("-reset_timestamps".to_string());
        args.push("1".to_string());
        args.push(self.config.output_dir.join(format!("{continuity_id}_%d.{format}")).display().to_string());
        args
    }

    fn segment_path(&self, continuity_id: &str, format: &str, index: Option<u32>) -> PathBuf {
        match index {
            Some(idx) => self.config.output_dir.join(format!("{continuity_id}_{idx}.{format}")),
            None => self.config.output_dir.join(format!("{continuity_id}.{format}")),
        }
    }

    fn spawn_rotation_watcher(&self, session_id: String, cancel: CancellationToken) {
        let sessions = self.sessions.clone();
        let continuity = self.continuity.clone();
        let events = self.events.clone();
        let process = self.process.clone();
        let ffmpeg_binary = self.config.ffmpeg_binary.clone();
        let poll_interval = self.config.rotation_poll_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        let should_rotate;
                        let should_stop_on_duration;
                        {
                            let sessions_guard = sessions.read().await;
                            let Some(slot) = sessions_guard.get(&session_id) else { return };
                            let elapsed = chrono::Utc::now().signed_duration_since(slot.session.start_time).to_std().unwrap_or_default();
                            should_stop_on_duration = slot.session.max_duration.map(|max| elapsed >= max).unwrap_or(false);
                            should_rotate = !should_stop_on_duration
                                && slot.session.auto_rotate
                                && slot.session.rotation_size.map(|limit| {
                                    std::fs::metadata(&slot.session.file_path).map(|m| m.len() >= limit).unwrap_or(false)
                                }).unwrap_or(false);
                        }

                        if should_stop_on_duration {
                            let mut guard = sessions.write().await;
                            if let Some(mut slot) = guard.remove(&session_id) {
                                let _ = slot.handle.stop(Duration::from_secs(5), Duration::from_secs(3)).await;
                                slot.session.status = SessionStatus::Stopped;
                                events.publish(DomainEvent::RecordingStatusUpdate {
                                    session_id: slot.session.id.clone(),
                                    device: slot.session.device.clone(),
                                    status: SessionStatus::Stopped,
                                });
                            }
                            return;
                        }

                        if should_rotate {
                            Self::rotate_locked(&sessions, &continuity, &events, &process, &ffmpeg_binary, &session_id).await;
                        }
                    }
                }
            }
        });
    }

    /// Segment-muxer recordings (§4.7 "bounded `max_segments`") are cut by
    /// ffmpeg itself, not by `rotate_locked`; this watcher only trims the
    /// oldest segment once the directory holds more than `max_segments`.
    fn spawn_segment_overflow_watcher(&self, continuity_id: String, format: String, max_segments: u32, cancel: CancellationToken) {
        let output_dir = self.config.output_dir.clone();
        let continuity = self.continuity.clone();
        let poll_interval = self.config.rotation_poll_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        let prefix = format!("{continuity_id}_");
                        let dir = output_dir.clone();
                        let fmt = format.clone();
                        let segments = tokio::task::spawn_blocking(move || -> Vec<(u32, PathBuf)> {
                            let mut found = Vec::new();
                            let Ok(read_dir) = std::fs::read_dir(&dir) else { return found };
                            for entry in read_dir.flatten() {
                                let name = entry.file_name().to_string_lossy().to_string();
                                let Some(rest) = name.strip_prefix(&prefix) else { continue };
                                let Some(idx_str) = rest.strip_suffix(&format!(".{fmt}")) else { continue };
                                if let Ok(idx) = idx_str.parse::<u32>() {
                                    found.push((idx, entry.path()));
                                }
                            }
                            found.sort_by_key(|(idx, _)| *idx);
                            found
                        }).await.unwrap_or_default();

                        if segments.len() as u32 <= max_segments {
                            continue;
                        }

                        let overflow = segments.len() - max_segments as usize;
                        let removed: Vec<PathBuf> = segments.into_iter().take(overflow).map(|(_, path)| path).collect();
                        for path in &removed {
                            if let Err(e) = tokio::fs::remove_file(path).await {
                                warn!(path = %path.display(), error = %e, "failed to remove overflow segment");
                            }
                        }

                        let mut cont_guard = continuity.write().await;
                        if let Some(record) = cont_guard.get_mut(&continuity_id) {
                            record.segment_paths.retain(|p| !removed.iter().any(|rp| rp.display().to_string() == *p));
                        }
                    }
                }
            }
        });
    }

    async fn rotate_locked(
        sessions: &Arc<RwLock<HashMap<String, SessionSlot>>>,
        continuity: &Arc<RwLock<HashMap<String, RecordingContinuity>>>,
        events: &Arc<EventBus>,
        process: &Arc<ProcessRunner>,
        ffmpeg_binary: &str,
        session_id: &str,
    ) {
        let mut guard = sessions.write().await;
        let Some(slot) = guard.get_mut(session_id) else { return };

        slot.session.status = SessionStatus::Rotating;
        events.publish(DomainEvent::RecordingStatusUpdate {
            session_id: slot.session.id.clone(),
            device: slot.session.device.clone(),
            status: SessionStatus::Rotating,
        });

        if let Err(e) = slot.handle.stop(Duration::from_secs(5), Duration::from_secs(3)).await {
            warn!(session_id, error = %e, "failed to stop segment cleanly before rotation");
        }

        let format = slot.session.file_path.rsplit('.').next().unwrap_or("mp4").to_string();
        let next_index = slot.session.segment_count;
        let next_path = format!("{}_{}.{}", slot.session.continuity_id, next_index, format);

        let args = vec![
            "-y".to_string(),
            "-f".to_string(),
            "v4l2".to_string(),
            "-i".to_string(),
            slot.session.device.clone(),
            "-an".to_string(),
            next_path.clone(),
        ];

        match process.spawn(ffmpeg_binary, &args) {
            Ok(handle) => {
                slot.handle = handle;
                slot.session.file_path = next_path.clone();
                slot.session.segment_count += 1;
                slot.session.status = SessionStatus::Recording;

                let mut cont_guard = continuity.write().await;
                if let Some(record) = cont_guard.get_mut(&slot.session.continuity_id) {
                    record.segment_paths.push(next_path.clone());
                    record.last_segment_index = next_index;
                }

                events.publish(DomainEvent::RecordingRotated {
                    session_id: slot.session.id.clone(),
                    new_file_path: next_path,
                    segment_index: next_index,
                });
                events.publish(DomainEvent::RecordingStatusUpdate {
                    session_id: slot.session.id.clone(),
                    device: slot.session.device.clone(),
                    status: SessionStatus::Recording,
                });
            }
            Err(e) => {
                warn!(session_id, error = %e, "failed to start next segment, marking session failed");
                slot.session.status = SessionStatus::Failed;
                events.publish(DomainEvent::RecordingStatusUpdate {
                    session_id: slot.session.id.clone(),
                    device: slot.session.device.clone(),
                    status: SessionStatus::Failed,
                });
            }
        }
    }

    pub async fn rotate_recording_file(&self, session_id: &str) -> Result<()> {
        {
            let guard = self.sessions.read().await;
            guard.get(session_id).ok_or_else(|| AppError::FileNotFound(session_id.to_string()))?;
        }
        Self::rotate_locked(&self.sessions, &self.continuity, &self.events, &self.process, &self.config.ffmpeg_binary, session_id).await;
        Ok(())
    }

    pub async fn stop_recording(&self, session_id: &str) -> Result<RecordingSession> {
        let mut guard = self.sessions.write().await;
        let mut slot = guard
            .remove(session_id)
            .ok_or_else(|| AppError::FileNotFound(session_id.to_string()))?;
        slot.cancel.cancel();

        slot.handle
            .stop(self.config.termination_timeout, self.config.kill_timeout)
            .await
            .map_err(|e| RecordingError::new(session_id, &slot.session.device, "stop_recording", e))?;

        slot.session.status = SessionStatus::Stopped;
        self.events.publish(DomainEvent::RecordingStatusUpdate {
            session_id: slot.session.id.clone(),
            device: slot.session.device.clone(),
            status: SessionStatus::Stopped,
        });
        info!(session_id, "recording stopped");
        Ok(slot.session)
    }

    pub async fn stop_recording_with_continuity(&self, session_id: &str) -> Result<RecordingSession> {
        let session = self.stop_recording(session_id).await?;
        // Continuity metadata is kept in `self.continuity` regardless of
        // stop path; this variant exists as the documented entry point for
        // callers that explicitly need the record preserved for a future
        // resume, so no further action beyond the base stop is required.
        Ok(session)
    }

    pub async fn get_recording_session(&self, id: &str) -> Option<RecordingSession> {
        self.sessions.read().await.get(id).map(|s| s.session.clone())
    }

    pub async fn get_session_by_device(&self, device: &str) -> Option<RecordingSession> {
        self.sessions.read().await.values().find(|s| s.session.device == device).map(|s| s.session.clone())
    }

    pub async fn list_recording_sessions(&self) -> Vec<RecordingSession> {
        self.sessions.read().await.values().map(|s| s.session.clone()).collect()
    }

    pub async fn get_recording_continuity(&self, session_id: &str) -> Option<RecordingContinuity> {
        let continuity_id = self.sessions.read().await.get(session_id).map(|s| s.session.continuity_id.clone())?;
        self.continuity.read().await.get(&continuity_id).cloned()
    }

    /// `list_recordings(ctx, limit, offset)` (§4.7): paginated listing of
    /// files under the recordings root, newest first.
    pub async fn list_recordings(&self, limit: usize, offset: usize) -> Result<FileListing<RecordingInfo>> {
        let mut infos = self.scan_recordings().await?;
        infos.sort_by(|a, b| b.modified_time.cmp(&a.modified_time));
        let total = infos.len();
        let files = infos.into_iter().skip(offset).take(limit).collect();
        Ok(FileListing { files, total, limit, offset })
    }

    async fn scan_recordings(&self) -> Result<Vec<RecordingInfo>> {
        let dir = self.config.output_dir.clone();
        let continuity = self.continuity.read().await.clone();
        let sessions: HashMap<String, String> = {
            let guard = self.sessions.read().await;
            guard.values().map(|s| (s.session.continuity_id.clone(), s.session.id.clone())).collect()
        };

        tokio::task::spawn_blocking(move || -> Result<Vec<RecordingInfo>> {
            let mut out = Vec::new();
            let read_dir = match std::fs::read_dir(&dir) {
                Ok(rd) => rd,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(AppError::Io(e)),
            };
            for entry in read_dir.flatten() {
                let Ok(meta) = entry.metadata() else { continue };
                if !meta.is_file() {
                    continue;
                }
                let filename = entry.file_name().to_string_lossy().to_string();
                let stem = filename.split('.').next().unwrap_or(&filename);
                let continuity_id = stem.splitn(2, '_').next().unwrap_or(stem).to_string();
                let modified: chrono::DateTime<chrono::Utc> = meta.modified().ok().map(chrono::DateTime::from).unwrap_or_else(chrono::Utc::now);

                out.push(RecordingInfo {
                    filename: filename.clone(),
                    size: meta.len(),
                    modified_time: modified,
                    continuity_id: continuity.contains_key(&continuity_id).then_some(continuity_id.clone()),
                    session_id: sessions.get(&continuity_id).cloned(),
                });
            }
            Ok(out)
        })
        .await
        .map_err(|e| AppError::Internal(format!("recording scan task panicked: {e}")))?
    }

    /// **Resolution of Open Question 2**: succeeds for any file under the
    /// recordings root, enriched with continuity metadata when known.
    pub async fn get_recording_info(&self, filename: &str) -> Result<RecordingInfo> {
        let path = self.config.output_dir.join(filename);
        let meta = tokio::fs::metadata(&path).await.map_err(|_| AppError::FileNotFound(filename.to_string()))?;
        let stem = filename.split('.').next().unwrap_or(filename);
        let continuity_id = stem.splitn(2, '_').next().unwrap_or(stem).to_string();

        let has_continuity = self.continuity.read().await.contains_key(&continuity_id);
        let session_id = {
            let guard = self.sessions.read().await;
            guard.values().find(|s| s.session.continuity_id == continuity_id).map(|s| s.session.id.clone())
        };

        Ok(RecordingInfo {
            filename: filename.to_string(),
            size: meta.len(),
            modified_time: meta.modified().ok().map(chrono::DateTime::from).unwrap_or_else(chrono::Utc::now),
            continuity_id: has_continuity.then_some(continuity_id),
            session_id,
        })
    }

    pub async fn delete_recording(&self, filename: &str) -> Result<()> {
        let path = self.config.output_dir.join(filename);
        tokio::fs::remove_file(&path).await.map_err(|_| AppError::FileNotFound(filename.to_string()))?;
        Ok(())
    }

    pub fn update_storage_thresholds(&self, warn_pct: f64, block_pct: f64) {
        self.storage.update_thresholds(warn_pct, block_pct);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(dir: &std::path::Path) -> RecordingEngine {
        let storage_config = crate::storage::StorageMonitorConfig {
            recordings_dir: dir.to_path_buf(),
            snapshots_dir: dir.join("snapshots"),
            sample_interval: Duration::from_secs(30),
            warn_pct: 80.0,
            block_pct: 95.0,
        };
        RecordingEngine::new(
            RecordingEngineConfig {
                output_dir: dir.to_path_buf(),
                ffmpeg_binary: "ffmpeg".to_string(),
                default_format: "mp4".to_string(),
                default_segment_duration: Duration::from_secs(300),
                recording_start_timeout: Duration::from_secs(10),
                termination_timeout: Duration::from_secs(5),
                kill_timeout: Duration::from_secs(3),
                rotation_poll_interval: Duration::from_secs(5),
            },
            Arc::new(RouterClient::new("127.0.0.1", 9997, 0, Duration::from_millis(50), Duration::from_millis(100))),
            Arc::new(ProcessRunner::new(4096)),
            Arc::new(StorageMonitor::new(storage_config, Arc::new(EventBus::new()))),
            Arc::new(EventBus::new()),
        )
    }

    #[test]
    fn use_case_defaults_match_table() {
        let d = UseCase::Recording.defaults();
        assert_eq!(d.retention_days, 7);
        assert!(d.auto_rotate);
        assert_eq!(d.rotation_size, Some(100 * 1024 * 1024));

        let v = UseCase::Viewing.defaults();
        assert_eq!(v.retention_days, 1);
        assert!(!v.auto_rotate);
    }

    #[tokio::test]
    async fn stop_unknown_session_fails() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        assert!(matches!(engine.stop_recording("nope").await, Err(AppError::FileNotFound(_))));
    }

    #[tokio::test]
    async fn get_recording_info_succeeds_for_foreign_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("abc123.mp4"), b"data").unwrap();
        let engine = engine(dir.path());

        let info = engine.get_recording_info("abc123.mp4").await.unwrap();
        assert_eq!(info.filename, "abc123.mp4");
        assert!(info.continuity_id.is_none());
        assert!(info.session_id.is_none());
    }

    #[tokio::test]
    async fn get_recording_info_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());
        assert!(matches!(engine.get_recording_info("missing.mp4").await, Err(AppError::FileNotFound(_))));
    }

    #[tokio::test]
    async fn segment_overflow_watcher_trims_oldest_segments() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5u32 {
            std::fs::write(dir.path().join(format!("cont_{i}.mp4")), b"x").unwrap();
        }

        let storage_config = crate::storage::StorageMonitorConfig {
            recordings_dir: dir.path().to_path_buf(),
            snapshots_dir: dir.path().join("snapshots"),
            sample_interval: Duration::from_secs(30),
            warn_pct: 80.0,
            block_pct: 95.0,
        };
        let engine = RecordingEngine::new(
            RecordingEngineConfig {
                output_dir: dir.path().to_path_buf(),
                ffmpeg_binary: "ffmpeg".to_string(),
                default_format: "mp4".to_string(),
                default_segment_duration: Duration::from_secs(300),
                recording_start_timeout: Duration::from_secs(10),
                termination_timeout: Duration::from_secs(5),
                kill_timeout: Duration::from_secs(3),
                rotation_poll_interval: Duration::from_millis(10),
            },
            Arc::new(RouterClient::new("127.0.0.1", 9997, 0, Duration::from_millis(50), Duration::from_millis(100))),
            Arc::new(ProcessRunner::new(4096)),
            Arc::new(StorageMonitor::new(storage_config, Arc::new(EventBus::new()))),
            Arc::new(EventBus::new()),
        );

        engine.continuity.write().await.insert(
            "cont".to_string(),
            RecordingContinuity {
                continuity_id: "cont".to_string(),
                device: "/dev/video0".to_string(),
                segment_paths: (0..5).map(|i| dir.path().join(format!("cont_{i}.mp4")).display().to_string()).collect(),
                last_segment_index: 4,
            },
        );

        let cancel = CancellationToken::new();
        engine.spawn_segment_overflow_watcher("cont".to_string(), "mp4".to_string(), 2, cancel.clone());
        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();

        let remaining: Vec<_> = std::fs::read_dir(dir.path()).unwrap().flatten().map(|e| e.file_name().to_string_lossy().to_string()).collect();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.contains(&"cont_3.mp4".to_string()));
        assert!(remaining.contains(&"cont_4.mp4".to_string()));

        let record = engine.continuity.read().await.get("cont").cloned().unwrap();
        assert_eq!(record.segment_paths.len(), 2);
    }

    #[tokio::test]
    async fn list_recordings_paginates() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..3 {
            std::fs::write(dir.path().join(format!("seg{i}.mp4")), b"x").unwrap();
        }
        let engine = engine(dir.path());

        let page1 = engine.list_recordings(2, 0).await.unwrap();
        assert_eq!(page1.total, 3);
        assert_eq!(page1.files.len(), 2);

        let page2 = engine.list_recordings(2, 2).await.unwrap();
        assert_eq!(page2.files.len(), 1);
    }
}
