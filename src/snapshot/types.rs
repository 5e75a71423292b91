use serde::{Deserialize, Serialize};

/// §3 Snapshot.status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SnapshotStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub device: String,
    pub file_path: String,
    pub created_time: chrono::DateTime<chrono::Utc>,
    pub file_size: u64,
    /// 1 = fast path (active stream), 2 = slow path (transient path created).
    pub tier: u8,
    pub status: SnapshotStatus,
}

/// §4.6 `take_snapshot` options. Any field left `None` falls back to the
/// process-local settings, which themselves default from the `snapshots`
/// config section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotOptions {
    pub format: Option<String>,
    pub quality: Option<u8>,
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
    pub auto_resize: Option<bool>,
    pub compression: Option<u8>,
}

/// Resolved settings after merging runtime overrides onto process-local
/// defaults (§4.6 "Settings get/set operations are process-local").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotSettings {
    pub format: String,
    pub quality: u8,
    pub max_width: u32,
    pub max_height: u32,
    pub auto_resize: bool,
    pub compression: u8,
}

impl SnapshotSettings {
    pub fn merged_with(&self, options: &SnapshotOptions) -> SnapshotSettings {
        SnapshotSettings {
            format: options.format.clone().unwrap_or_else(|| self.format.clone()),
            quality: options.quality.unwrap_or(self.quality),
            max_width: options.max_width.unwrap_or(self.max_width),
            max_height: options.max_height.unwrap_or(self.max_height),
            auto_resize: options.auto_resize.unwrap_or(self.auto_resize),
            compression: options.compression.unwrap_or(self.compression),
        }
    }
}
