use serde::{Deserialize, Serialize};

/// §4.11 Storage Monitor sampling result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StorageSnapshot {
    pub total_space: u64,
    pub used_space: u64,
    pub available_space: u64,
    pub usage_percentage: f64,
    pub recordings_size: u64,
    pub snapshots_size: u64,
    pub low_space_warning: bool,
}
