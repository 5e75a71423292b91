//! RPC Server (C9): transports a persistent JSON-RPC 2.0 message stream
//! per client over the message-stream transport (wired to a WebSocket in
//! `web::ws`), with the method table in `dispatch`.

mod connection;
mod dispatch;
mod metrics;
mod types;

pub use connection::{ClientConnection, MethodClass};
pub use dispatch::{dispatch, RpcContext};
pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use types::{RpcErrorBody, RpcId, RpcNotification, RpcRequest, RpcResponse};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::json;
use uuid::Uuid;

use crate::auth::TokenVerifier;
use crate::controller::Controller;
use crate::events::DomainEvent;

/// Owns the client table and the shared dispatch context. One instance per
/// process, constructed alongside the Controller in `AppState`.
pub struct RpcServer {
    ctx: RpcContext,
    clients: RwLock<HashMap<String, ClientSummary>>,
}

/// Externally visible subset of a `ClientConnection`, kept in the server's
/// own table so `get_status`-style introspection doesn't need to reach
/// into each connection task.
#[derive(Debug, Clone)]
struct ClientSummary {
    authenticated: bool,
    user_id: Option<String>,
}

const STATUS_BUCKET_CAPACITY: u32 = 60;
const STATUS_REFILL_PER_SEC: f64 = 20.0;
const CONTROL_BUCKET_CAPACITY: u32 = 20;
const CONTROL_REFILL_PER_SEC: f64 = 5.0;

impl RpcServer {
    pub fn new(controller: Arc<Controller>, verifier: Arc<dyn TokenVerifier>) -> Arc<Self> {
        Arc::new(Self {
            ctx: RpcContext {
                controller,
                verifier,
                metrics: Arc::new(ServerMetrics::new()),
            },
            clients: RwLock::new(HashMap::new()),
        })
    }

    pub fn new_connection(&self) -> (String, ClientConnection) {
        let client_id = Uuid::new_v4().to_string();
        self.clients.write().insert(
            client_id.clone(),
            ClientSummary { authenticated: false, user_id: None },
        );
        self.ctx.metrics.connection_opened();
        (
            client_id.clone(),
            ClientConnection::new(
                client_id,
                STATUS_BUCKET_CAPACITY,
                STATUS_REFILL_PER_SEC,
                CONTROL_BUCKET_CAPACITY,
                CONTROL_REFILL_PER_SEC,
            ),
        )
    }

    pub fn drop_connection(&self, client_id: &str) {
        self.clients.write().remove(client_id);
        self.ctx.metrics.connection_closed();
    }

    /// Auth-failure threshold from the `auth.max_auth_failures` config
    /// (§4.10: "repeated failures above a threshold close the connection").
    /// The caller is the transport loop, which owns the socket and is the
    /// only thing that can actually close it.
    pub fn should_close_for_auth_failures(&self, conn: &ClientConnection, max_auth_failures: u32) -> bool {
        conn.auth_failures >= max_auth_failures
    }

    /// Parses one inbound text frame and dispatches it. A frame that isn't
    /// even valid JSON has no recoverable id, so per §4.10 the caller must
    /// close the connection rather than send this response; a frame that
    /// parses as JSON but not as a well-formed request still gets the
    /// standard parse-error response.
    pub async fn handle_frame(&self, raw: &str, conn: &mut ClientConnection) -> Option<RpcResponse> {
        let value: serde_json::Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(_) => return None,
        };

        let req: RpcRequest = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(_) => return Some(RpcResponse::parse_error()),
        };

        let response = dispatch(&req, conn, &self.ctx).await;

        if let Some(summary) = self.clients.write().get_mut(&conn.client_id) {
            summary.authenticated = conn.authenticated;
            summary.user_id = conn.user_id.clone();
        }

        Some(response)
    }

    pub fn metrics(&self) -> Arc<ServerMetrics> {
        self.ctx.metrics.clone()
    }

    pub fn authenticated_client_count(&self) -> usize {
        self.clients.read().values().filter(|c| c.authenticated).count()
    }
}

/// Projects a [`DomainEvent`] onto the server-initiated notifications that
/// §4.9 specifies (`camera_status_update`, `recording_status_update`).
/// Other event kinds are process-internal (logging, health) and are not
/// forwarded to clients.
pub fn event_to_notification(event: &DomainEvent) -> Option<RpcNotification> {
    let params = match event {
        DomainEvent::CameraStatusUpdate { device, status } => json!({"device": device, "status": status}),
        DomainEvent::CameraRemoved { device } => json!({"device": device}),
        DomainEvent::RecordingStatusUpdate { session_id, device, status } => {
            json!({"session_id": session_id, "device": device, "status": status})
        }
        _ => return None,
    };

    let method = match event {
        DomainEvent::CameraStatusUpdate { .. } | DomainEvent::CameraRemoved { .. } => "camera_status_update",
        DomainEvent::RecordingStatusUpdate { .. } => "recording_status_update",
        _ => unreachable!(),
    };

    Some(RpcNotification { jsonrpc: "2.0", method, params })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenVerifier;
    use crate::controller::Controller;
    use crate::device::{DeviceManager, FilesystemChecker, TextFormatParser};
    use crate::events::EventBus;
    use crate::health::{HealthMonitor, HealthMonitorConfig};
    use crate::process::ProcessRunner;
    use crate::recording::{RecordingEngine, RecordingEngineConfig};
    use crate::router::RouterClient;
    use crate::snapshot::{SnapshotEngine, SnapshotEngineConfig, SnapshotSettings};
    use crate::storage::{StorageMonitor, StorageMonitorConfig};
    use std::time::Duration;

    fn server(dir: &std::path::Path) -> Arc<RpcServer> {
        let events = Arc::new(EventBus::new());
        let router = Arc::new(RouterClient::new("127.0.0.1", 9997, 0, Duration::from_millis(10), Duration::from_millis(50)));
        let health = Arc::new(HealthMonitor::new(
            HealthMonitorConfig {
                health_check_interval: Duration::from_secs(30),
                failure_threshold: 3,
                recovery_threshold: 2,
                circuit_breaker_timeout: Duration::from_secs(5),
                backoff_multiplier: 2.0,
                backoff_jitter_low: 0.0,
                backoff_jitter_high: 0.0,
                max_backoff: Duration::from_secs(30),
                state_file: None,
            },
            router.clone(),
            events.clone(),
        ));
        let device = Arc::new(DeviceManager::new(
            crate::device::DeviceManagerConfig {
                device_range: vec![0],
                poll_interval: Duration::from_secs(30),
                detection_timeout: Duration::from_secs(2),
                enable_capability_detection: false,
                capability_timeout: Duration::from_secs(2),
                capability_retry_interval: Duration::from_secs(10),
                capability_max_retries: 1,
                probe_program: "true".to_string(),
            },
            Arc::new(FilesystemChecker),
            Arc::new(ProcessRunner::new(4096)),
            Arc::new(TextFormatParser),
            events.clone(),
        ));
        let storage = Arc::new(StorageMonitor::new(
            StorageMonitorConfig {
                recordings_dir: dir.join("recordings"),
                snapshots_dir: dir.join("snapshots"),
                sample_interval: Duration::from_secs(30),
                warn_pct: 80.0,
                block_pct: 95.0,
            },
            events.clone(),
        ));
        let recording = Arc::new(RecordingEngine::new(
            RecordingEngineConfig {
                output_dir: dir.join("recordings"),
                ffmpeg_binary: "ffmpeg".to_string(),
                default_format: "mp4".to_string(),
                default_segment_duration: Duration::from_secs(300),
                recording_start_timeout: Duration::from_secs(10),
                termination_timeout: Duration::from_secs(5),
                kill_timeout: Duration::from_secs(3),
                rotation_poll_interval: Duration::from_secs(5),
            },
            router.clone(),
            Arc::new(ProcessRunner::new(4096)),
            storage.clone(),
            events.clone(),
        ));
        let snapshot = Arc::new(SnapshotEngine::new(
            SnapshotEngineConfig {
                output_dir: dir.join("snapshots"),
                ffmpeg_binary: "ffmpeg".to_string(),
                snapshot_execution_timeout: Duration::from_secs(2),
                snapshot_retries: 0,
                rtsp_port: 8554,
                auto_start_streams: false,
                stream_readiness_timeout: Duration::from_millis(100),
                stream_readiness_check_interval: Duration::from_millis(20),
                default_settings: SnapshotSettings {
                    format: "jpg".to_string(),
                    quality: 85,
                    max_width: 1920,
                    max_height: 1080,
                    auto_resize: true,
                    compression: 2,
                },
            },
            router.clone(),
            Arc::new(ProcessRunner::new(4096)),
            events.clone(),
        ));

        let controller = Controller::new(router, health, device, snapshot, recording, storage);
        let verifier = Arc::new(StaticTokenVerifier::new(&[crate::auth::TokenEntry {
            token: "secret".to_string(),
            user_id: "alice".to_string(),
            role: crate::auth::Role::Operator,
        }]));
        RpcServer::new(controller, verifier)
    }

    #[tokio::test]
    async fn ping_without_auth_requires_authentication_like_any_other_method() {
        let dir = tempfile::tempdir().unwrap();
        let srv = server(dir.path());
        let (_, mut conn) = srv.new_connection();

        let resp = srv.handle_frame(r#"{"jsonrpc":"2.0","method":"ping","id":1}"#, &mut conn).await.unwrap();
        assert_eq!(resp.error.unwrap().code, -32001);

        let resp = srv
            .handle_frame(r#"{"jsonrpc":"2.0","method":"get_camera_list","id":2}"#, &mut conn)
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, -32001);
    }

    #[tokio::test]
    async fn authenticate_then_forbidden_for_admin_method() {
        let dir = tempfile::tempdir().unwrap();
        let srv = server(dir.path());
        let (_, mut conn) = srv.new_connection();

        let resp = srv
            .handle_frame(r#"{"jsonrpc":"2.0","method":"authenticate","params":{"auth_token":"secret"},"id":1}"#, &mut conn)
            .await
            .unwrap();
        assert!(resp.error.is_none());

        let resp = srv
            .handle_frame(r#"{"jsonrpc":"2.0","method":"get_metrics","id":2}"#, &mut conn)
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, -32003);
    }

    #[tokio::test]
    async fn malformed_json_has_no_recoverable_id() {
        let dir = tempfile::tempdir().unwrap();
        let srv = server(dir.path());
        let (_, mut conn) = srv.new_connection();
        assert!(srv.handle_frame("not json", &mut conn).await.is_none());
    }

    #[tokio::test]
    async fn unknown_jsonrpc_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let srv = server(dir.path());
        let (_, mut conn) = srv.new_connection();
        let resp = srv
            .handle_frame(r#"{"jsonrpc":"1.0","method":"ping","id":1}"#, &mut conn)
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, -32600);
    }
}
