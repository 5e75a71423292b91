use serde::{Deserialize, Serialize};

/// §3 RecordingSession.status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    Recording,
    Stopped,
    Failed,
    Rotating,
}

/// §3 RecordingSession.use_case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UseCase {
    Recording,
    Viewing,
    Snapshot,
}

/// §3 RecordingSession.quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    Medium,
    High,
}

impl Default for Quality {
    fn default() -> Self {
        Quality::Medium
    }
}

/// Per-use-case defaults from §4.7's table.
pub struct UseCaseDefaults {
    pub priority: i32,
    pub retention_days: u32,
    pub auto_cleanup: bool,
    pub auto_rotate: bool,
    pub rotation_size: Option<u64>,
    pub max_duration: Option<std::time::Duration>,
}

impl UseCase {
    pub fn defaults(&self) -> UseCaseDefaults {
        match self {
            UseCase::Recording => UseCaseDefaults {
                priority: 2,
                retention_days: 7,
                auto_cleanup: true,
                auto_rotate: true,
                rotation_size: Some(100 * 1024 * 1024),
                max_duration: Some(std::time::Duration::from_secs(24 * 3600)),
            },
            UseCase::Viewing => UseCaseDefaults {
                priority: 2,
                retention_days: 1,
                auto_cleanup: true,
                auto_rotate: false,
                rotation_size: None,
                max_duration: None,
            },
            UseCase::Snapshot => UseCaseDefaults {
                priority: 3,
                retention_days: 7,
                auto_cleanup: true,
                auto_rotate: false,
                rotation_size: None,
                max_duration: None,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingSession {
    pub id: String,
    pub device: String,
    pub continuity_id: String,
    pub file_path: String,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub status: SessionStatus,
    pub use_case: UseCase,
    pub priority: i32,
    pub auto_cleanup: bool,
    pub retention_days: u32,
    pub quality: Quality,
    pub max_duration: Option<std::time::Duration>,
    pub auto_rotate: bool,
    pub rotation_size: Option<u64>,
    pub segment_count: u32,
}

/// §4.7 `start_recording` options. Unset fields fall back to the
/// use_case's defaults table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordingOptions {
    pub use_case: Option<UseCase>,
    pub quality: Option<Quality>,
    pub duration_secs: Option<u64>,
    pub format: Option<String>,
    pub continuity_mode: Option<bool>,
    pub segment_duration_secs: Option<u64>,
    pub max_segments: Option<u32>,
    pub audio: Option<bool>,
}

/// Continuity metadata persisted across rotations/stops so a resumed
/// recording (or a later `get_recording_continuity` call) can find its
/// lineage of segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingContinuity {
    pub continuity_id: String,
    pub device: String,
    pub segment_paths: Vec<String>,
    pub last_segment_index: u32,
}

/// Result shape for `list_recordings`/`list_snapshots`-style paginated
/// listings (§4.9: "list results always include {files, total, limit,
/// offset}").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileListing<T> {
    pub files: Vec<T>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

/// §4.7 `get_recording_info` result. Foreign files (produced by another
/// instance, or predating this process) still resolve, just without
/// continuity metadata (Open Question 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingInfo {
    pub filename: String,
    pub size: u64,
    pub modified_time: chrono::DateTime<chrono::Utc>,
    pub continuity_id: Option<String>,
    pub session_id: Option<String>,
}
