use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use camera_recording_service::auth::StaticTokenVerifier;
use camera_recording_service::config::{AppConfig, ConfigProvider};
use camera_recording_service::controller::Controller;
use camera_recording_service::device::{DeviceManager, DeviceManagerConfig, FilesystemChecker, TextFormatParser};
use camera_recording_service::events::EventBus;
use camera_recording_service::health::{HealthMonitor, HealthMonitorConfig};
use camera_recording_service::process::ProcessRunner;
use camera_recording_service::recording::{RecordingEngine, RecordingEngineConfig};
use camera_recording_service::router::RouterClient;
use camera_recording_service::rpc::RpcServer;
use camera_recording_service::snapshot::{SnapshotEngine, SnapshotEngineConfig, SnapshotSettings};
use camera_recording_service::state::AppState;
use camera_recording_service::storage::{StorageMonitor, StorageMonitorConfig};
use camera_recording_service::utils::bind_tcp_listener;
use camera_recording_service::web;

/// camera-recording-service command line arguments
#[derive(Parser, Debug)]
#[command(name = "camera-recording-service")]
#[command(version, about = "Camera discovery, recording and snapshot service", long_about = None)]
struct CliArgs {
    /// Path to the YAML configuration file
    #[arg(value_name = "CONFIG", env = "CAMERA_SERVICE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level, overriding the config file's logging.level for this run
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log format ("pretty" or "json"), overriding logging.format for this run
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<String>,
}

/// Distinguishes the three non-zero exit codes the service contract
/// promises (§6): config errors, startup errors, and fatal runtime errors.
enum ServiceError {
    Config(String),
    Startup(String),
    Runtime(String),
}

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    match run(args).await {
        Ok(()) => {}
        Err(ServiceError::Config(msg)) => {
            eprintln!("config error: {msg}");
            std::process::exit(1);
        }
        Err(ServiceError::Startup(msg)) => {
            eprintln!("startup error: {msg}");
            std::process::exit(2);
        }
        Err(ServiceError::Runtime(msg)) => {
            eprintln!("fatal runtime error: {msg}");
            std::process::exit(3);
        }
    }
}

async fn run(args: CliArgs) -> Result<(), ServiceError> {
    let config = Arc::new(
        ConfigProvider::load(args.config.as_deref()).map_err(|e| ServiceError::Config(e.to_string()))?,
    );

    let mut snapshot = (*config.snapshot()).clone();
    if let Some(level) = args.log_level {
        snapshot.logging.level = level;
    }
    if let Some(format) = args.log_format {
        snapshot.logging.format = format;
    }
    init_logging(&snapshot.logging.level, &snapshot.logging.format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting camera-recording-service"
    );

    tokio::fs::create_dir_all(&snapshot.recording.root_dir)
        .await
        .context("creating recording directory")
        .map_err(startup_error)?;
    tokio::fs::create_dir_all(&snapshot.snapshots.root_dir)
        .await
        .context("creating snapshots directory")
        .map_err(startup_error)?;

    let events = Arc::new(EventBus::new());
    let controller = build_controller(&snapshot, events.clone());

    controller
        .start()
        .await
        .context("starting controller")
        .map_err(startup_error)?;

    let verifier: Arc<dyn camera_recording_service::auth::TokenVerifier> =
        Arc::new(StaticTokenVerifier::new(&snapshot.auth.tokens));
    let rpc = RpcServer::new(controller.clone(), verifier);
    let state = AppState::new(config.clone(), events, controller.clone(), rpc);

    if hot_reload_enabled() {
        spawn_hot_reload(config.clone());
    }

    let app = web::create_router(state.clone());

    let addr: SocketAddr = format!("{}:{}", snapshot.server.host, snapshot.server.port)
        .parse()
        .context("parsing server.host/server.port")
        .map_err(startup_error)?;
    let listener = bind_tcp_listener(addr)
        .with_context(|| format!("binding {addr}"))
        .map_err(startup_error)?;
    let listener = tokio::net::TcpListener::from_std(listener)
        .context("adopting listener into the async runtime")
        .map_err(startup_error)?;
    tracing::info!(%addr, "listening");

    let shutdown_state = state.clone();
    let shutdown = async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c().await.expect("failed to install CTRL+C handler");
        };
        let mut shutdown_rx = shutdown_state.shutdown_signal();
        tokio::select! {
            _ = ctrl_c => {},
            _ = shutdown_rx.recv() => {},
        }
        tracing::info!("shutdown signal received");
    };

    let result = axum::serve(listener, app).with_graceful_shutdown(shutdown).await;

    state.controller.stop().await.map_err(|e| ServiceError::Runtime(e.to_string()))?;

    result.map_err(|e| ServiceError::Runtime(e.to_string()))?;

    tracing::info!("server shutdown complete");
    Ok(())
}

/// Startup failures get the `anyhow` context chain rendered in full
/// (§10.2 "anyhow-style context wrapper for operator-facing diagnostics"),
/// while still mapping onto exit code 2.
fn startup_error(err: anyhow::Error) -> ServiceError {
    ServiceError::Startup(format!("{err:#}"))
}

fn build_controller(config: &AppConfig, events: Arc<EventBus>) -> Arc<Controller> {
    let router = Arc::new(RouterClient::new(
        &config.mediarouter.host,
        config.mediarouter.api_port,
        config.mediarouter.retry_attempts,
        Duration::from_millis(config.mediarouter.retry_delay_ms),
        Duration::from_secs(config.mediarouter.request_timeout_secs),
    ));

    let state_file = PathBuf::from(&config.recording.root_dir)
        .parent()
        .map(|p| p.join("health_status.json"));
    let health = Arc::new(HealthMonitor::new(
        HealthMonitorConfig {
            health_check_interval: Duration::from_secs(config.mediarouter.health_check_interval_secs),
            failure_threshold: config.mediarouter.failure_threshold,
            recovery_threshold: config.mediarouter.recovery_threshold,
            circuit_breaker_timeout: Duration::from_secs(config.mediarouter.circuit_breaker_timeout_secs),
            backoff_multiplier: config.mediarouter.backoff_multiplier,
            backoff_jitter_low: config.mediarouter.backoff_jitter_low,
            backoff_jitter_high: config.mediarouter.backoff_jitter_high,
            max_backoff: Duration::from_secs(config.mediarouter.max_backoff_secs),
            state_file,
        },
        router.clone(),
        events.clone(),
    ));

    let process = Arc::new(ProcessRunner::new(config.ffmpeg.max_captured_output_bytes));

    let device = Arc::new(DeviceManager::new(
        DeviceManagerConfig {
            device_range: config.camera.device_range.clone(),
            poll_interval: Duration::from_secs(config.camera.poll_interval_secs),
            detection_timeout: Duration::from_secs(config.camera.detection_timeout_secs),
            enable_capability_detection: config.camera.enable_capability_detection,
            capability_timeout: Duration::from_secs(config.camera.capability_timeout_secs),
            capability_retry_interval: Duration::from_secs(config.camera.capability_retry_interval_secs),
            capability_max_retries: config.camera.capability_max_retries,
            probe_program: config.camera.probe_program.clone(),
        },
        Arc::new(FilesystemChecker),
        process.clone(),
        Arc::new(TextFormatParser),
        events.clone(),
    ));

    let storage = Arc::new(StorageMonitor::new(
        StorageMonitorConfig {
            recordings_dir: PathBuf::from(&config.recording.root_dir),
            snapshots_dir: PathBuf::from(&config.snapshots.root_dir),
            sample_interval: Duration::from_secs(30),
            warn_pct: config.recording.storage_warn_pct,
            block_pct: config.recording.storage_block_pct,
        },
        events.clone(),
    ));

    let recording = Arc::new(RecordingEngine::new(
        RecordingEngineConfig {
            output_dir: PathBuf::from(&config.recording.root_dir),
            ffmpeg_binary: config.ffmpeg.binary.clone(),
            default_format: config.recording.format.clone(),
            default_segment_duration: Duration::from_secs(config.recording.segment_duration_secs),
            recording_start_timeout: Duration::from_secs(config.ffmpeg.recording_start_timeout_secs),
            termination_timeout: Duration::from_secs(config.ffmpeg.termination_timeout_secs),
            kill_timeout: Duration::from_secs(config.ffmpeg.kill_timeout_secs),
            rotation_poll_interval: Duration::from_secs(5),
        },
        router.clone(),
        process.clone(),
        storage.clone(),
        events.clone(),
    ));

    let snapshot = Arc::new(SnapshotEngine::new(
        SnapshotEngineConfig {
            output_dir: PathBuf::from(&config.snapshots.root_dir),
            ffmpeg_binary: config.ffmpeg.binary.clone(),
            snapshot_execution_timeout: Duration::from_secs(config.ffmpeg.snapshot_execution_timeout_secs),
            snapshot_retries: config.ffmpeg.snapshot_retries,
            rtsp_port: config.mediarouter.rtsp_port,
            auto_start_streams: config.camera.auto_start_streams,
            stream_readiness_timeout: Duration::from_secs(config.stream_readiness.timeout_secs),
            stream_readiness_check_interval: Duration::from_millis(config.stream_readiness.check_interval_ms),
            default_settings: SnapshotSettings {
                format: config.snapshots.format.clone(),
                quality: config.snapshots.quality,
                max_width: config.snapshots.max_width,
                max_height: config.snapshots.max_height,
                auto_resize: true,
                compression: 2,
            },
        },
        router.clone(),
        process.clone(),
        events.clone(),
    ));

    Controller::new(router, health, device, snapshot, recording, storage)
}

fn hot_reload_enabled() -> bool {
    std::env::var("CAMERA_SERVICE_ENABLE_HOT_RELOAD")
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false)
}

/// Polls for config changes rather than watching the filesystem directly;
/// `ConfigProvider::reload` is all-or-nothing so a bad edit is simply
/// skipped until the file is fixed.
fn spawn_hot_reload(config: Arc<ConfigProvider>) {
    tracing::info!("hot reload enabled, polling config file every 5s");
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            interval.tick().await;
            if let Err(e) = config.reload() {
                tracing::warn!(error = %e, "config reload failed, keeping previous snapshot");
            }
        }
    });
}

fn init_logging(level: &str, format: &str) {
    let filter = format!("camera_recording_service={level},tower_http={level}");
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    let result = if format == "json" {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
    };

    if let Err(e) = result {
        eprintln!("failed to initialize tracing: {e}");
    }
}
