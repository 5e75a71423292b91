//! Configuration Provider (C1).
//!
//! Typed, reloadable snapshot of configuration: YAML on disk overlaid with
//! `CAMERA_SERVICE_*` environment variables, held behind a lock-free
//! snapshot cell with change-callback fan-out on reload.

mod schema;
mod store;

pub use schema::{
    AppConfig, AuthConfig, CameraConfig, CodecConfig, FfmpegConfig, LoggingConfig, MediaRouterConfig,
    RecordingConfig, ServerConfig, SnapshotsConfig, StreamReadinessConfig,
};
pub use store::ConfigProvider;
