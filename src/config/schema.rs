use serde::{Deserialize, Serialize};

use crate::auth::TokenEntry;

/// Top-level configuration snapshot. One field per recognized section
/// (§4.1). Every section derives `Default` so a partially-specified (or
/// entirely absent) YAML document still produces a usable configuration
/// once environment overrides are applied.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub mediarouter: MediaRouterConfig,
    pub camera: CameraConfig,
    pub logging: LoggingConfig,
    pub recording: RecordingConfig,
    pub snapshots: SnapshotsConfig,
    pub ffmpeg: FfmpegConfig,
    pub stream_readiness: StreamReadinessConfig,
    pub codec: CodecConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub stream_path: String,
    pub max_connections: u32,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8899,
            stream_path: "/ws".to_string(),
            max_connections: 256,
            read_timeout_secs: 30,
            write_timeout_secs: 10,
            heartbeat_interval_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaRouterConfig {
    pub host: String,
    pub api_port: u16,
    pub rtsp_port: u16,
    pub request_timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub health_check_interval_secs: u64,
    pub failure_threshold: u32,
    pub recovery_threshold: u32,
    pub circuit_breaker_timeout_secs: u64,
    pub backoff_multiplier: f64,
    pub backoff_jitter_low: f64,
    pub backoff_jitter_high: f64,
    pub max_backoff_secs: u64,
}

impl Default for MediaRouterConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            api_port: 9997,
            rtsp_port: 8554,
            request_timeout_secs: 5,
            retry_attempts: 3,
            retry_delay_ms: 200,
            health_check_interval_secs: 10,
            failure_threshold: 3,
            recovery_threshold: 2,
            circuit_breaker_timeout_secs: 30,
            backoff_multiplier: 2.0,
            backoff_jitter_low: 0.0,
            backoff_jitter_high: 0.2,
            max_backoff_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub poll_interval_secs: u64,
    pub detection_timeout_secs: u64,
    pub device_range: Vec<u32>,
    pub enable_capability_detection: bool,
    pub capability_timeout_secs: u64,
    pub capability_retry_interval_secs: u64,
    pub capability_max_retries: u32,
    pub auto_start_streams: bool,
    pub probe_program: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            detection_timeout_secs: 2,
            device_range: (0..8).collect(),
            enable_capability_detection: true,
            capability_timeout_secs: 3,
            capability_retry_interval_secs: 10,
            capability_max_retries: 3,
            auto_start_streams: true,
            probe_program: "v4l2-ctl".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "pretty" or "json"
    pub format: String,
    /// "stdout" or a file path
    pub target: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            target: "stdout".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub enabled: bool,
    pub root_dir: String,
    pub format: String,
    pub segment_duration_secs: u64,
    pub rotation_size_bytes: u64,
    pub retention_days: u32,
    pub storage_warn_pct: f64,
    pub storage_block_pct: f64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root_dir: "/var/lib/camera-service/recordings".to_string(),
            format: "mp4".to_string(),
            segment_duration_secs: 300,
            rotation_size_bytes: 100 * 1024 * 1024,
            retention_days: 7,
            storage_warn_pct: 80.0,
            storage_block_pct: 95.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotsConfig {
    pub enabled: bool,
    pub root_dir: String,
    pub format: String,
    pub quality: u8,
    pub max_width: u32,
    pub max_height: u32,
    pub retention_days: u32,
    pub max_count: usize,
}

impl Default for SnapshotsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root_dir: "/var/lib/camera-service/snapshots".to_string(),
            format: "jpg".to_string(),
            quality: 85,
            max_width: 1920,
            max_height: 1080,
            retention_days: 7,
            max_count: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FfmpegConfig {
    pub binary: String,
    pub snapshot_execution_timeout_secs: u64,
    pub snapshot_retries: u32,
    pub recording_start_timeout_secs: u64,
    pub termination_timeout_secs: u64,
    pub kill_timeout_secs: u64,
    pub max_captured_output_bytes: usize,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
            snapshot_execution_timeout_secs: 10,
            snapshot_retries: 1,
            recording_start_timeout_secs: 10,
            termination_timeout_secs: 5,
            kill_timeout_secs: 3,
            max_captured_output_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamReadinessConfig {
    pub timeout_secs: u64,
    pub check_interval_ms: u64,
}

impl Default for StreamReadinessConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 8,
            check_interval_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub profile: String,
    pub level: String,
    pub pixel_format: String,
    pub bitrate_kbps: u32,
    pub preset: String,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            profile: "main".to_string(),
            level: "4.0".to_string(),
            pixel_format: "yuv420p".to_string(),
            bitrate_kbps: 2000,
            preset: "veryfast".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Bearer tokens recognized by the `authenticate` method (§4.9). Empty
    /// by default — no token authenticates until the operator configures
    /// at least one entry.
    pub tokens: Vec<TokenEntry>,
    /// Connection is closed after this many failed `authenticate` calls
    /// (§4.9 "Connection lifecycle").
    pub max_auth_failures: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            tokens: Vec::new(),
            max_auth_failures: 5,
        }
    }
}

impl AppConfig {
    /// Required-field and range validation (§4.1). Called once after the
    /// file is parsed and the environment overlay has been applied.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be in 1..=65535".to_string());
        }
        if self.camera.poll_interval_secs == 0 {
            return Err("camera.poll_interval_secs must be > 0".to_string());
        }
        if self.camera.detection_timeout_secs == 0 {
            return Err("camera.detection_timeout_secs must be > 0".to_string());
        }
        if self.camera.device_range.is_empty() {
            return Err("camera.device_range must not be empty".to_string());
        }
        Ok(())
    }
}
