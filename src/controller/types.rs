/// One entry of the Controller's process-wide active-recording registry
/// (§4.8). Keyed by device path in [`super::Controller`]; external code
/// holds the device path as the key, never a pointer into this table
/// (§9 "arena + index for shared tables").
#[derive(Debug, Clone)]
pub struct ActiveRecording {
    pub device: String,
    pub session_id: String,
    pub stream_name: String,
}

/// Admin-settable defaults consulted by `cleanup_old_files` (§4.9
/// `set_retention_policy`) whenever a call omits `max_age`/`max_size`
/// explicitly. `max_age_days` and `max_count` mirror the parameters of
/// `cleanup_old_files` itself rather than introducing new units.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct RetentionPolicy {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub max_age_days: Option<u32>,
    #[serde(default)]
    pub max_count: Option<usize>,
}

fn default_true() -> bool {
    true
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { enabled: true, max_age_days: None, max_count: None }
    }
}
