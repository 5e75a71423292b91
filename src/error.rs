//! Application-wide error type.
//!
//! One variant family per error-handling taxonomy kind (config, transport,
//! auth, resource, state, conflict, child-process). The RPC dispatch layer
//! is the single place this type is translated into a JSON-RPC
//! `{code, message, data}` triple — see [`AppError::rpc_code`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    // --- Config ---
    #[error("config file not found: {0}")]
    ConfigMissing(String),

    #[error("config parse error: {0}")]
    ConfigParse(String),

    #[error("config validation failed: {0}")]
    ConfigInvalid(String),

    // --- Transport ---
    #[error("media router request timed out: {0}")]
    RouterTimeout(String),

    #[error("media router returned {status}: {body}")]
    RouterHttp { status: u16, body: String },

    #[error("message stream I/O error: {0}")]
    StreamIo(String),

    #[error("peer closed the connection")]
    PeerClosed,

    // --- Auth ---
    #[error("authentication required")]
    AuthRequired,

    #[error("invalid authentication token")]
    AuthInvalid,

    #[error("authentication token expired")]
    AuthExpired,

    #[error("insufficient role for this operation")]
    Forbidden,

    // --- Resource ---
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("capability not supported: {0}")]
    CapabilityUnsupported(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("path already exists: {0}")]
    PathExists(String),

    // --- State ---
    #[error("component not running: {0}")]
    NotRunning(String),

    #[error("component already running: {0}")]
    AlreadyRunning(String),

    #[error("circuit open for {0}")]
    CircuitOpen(String),

    #[error("storage usage at or above block threshold")]
    StorageCritical,

    // --- Conflict ---
    #[error("recording already in progress on {0}")]
    RecordingInProgress(String),

    #[error("session already exists: {0}")]
    SessionExists(String),

    // --- Snapshot (both tiers exhausted) ---
    #[error("snapshot failed at tier {tier}: {reason}")]
    SnapshotFailed { tier: u8, reason: String },

    // --- Recording (wraps a lower-level cause with session/device context) ---
    #[error("{0}")]
    Recording(Box<RecordingError>),

    // --- Child-process ---
    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("process exited with non-zero status: {0}")]
    ProcessExitNonZero(String),

    #[error("process timed out")]
    ProcessTimeout,

    #[error("process was killed after exceeding its termination timeout")]
    ProcessKilled,

    // --- Cancellation (cross-cutting; honored at every suspension point) ---
    #[error("operation canceled")]
    Canceled,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A JSON-RPC error code plus optional structured data, per §4.9's
/// wire-stable taxonomy.
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl AppError {
    /// Map this error onto the wire-stable JSON-RPC error code taxonomy.
    pub fn rpc_error(&self) -> RpcError {
        let code = match self {
            AppError::AuthRequired | AppError::AuthInvalid | AppError::AuthExpired => -32001,
            AppError::Forbidden => -32003,
            AppError::DeviceNotFound(_) => -32004,
            AppError::RecordingInProgress(_) => -32005,
            AppError::RouterTimeout(_) | AppError::RouterHttp { .. } | AppError::CircuitOpen(_) => -32006,
            AppError::StorageCritical => -32007,
            AppError::CapabilityUnsupported(_) => -32008,
            AppError::Recording(inner) => return inner.wrapped.rpc_error(),
            AppError::SnapshotFailed { .. } => -1004,
            _ => -32603,
        };
        RpcError {
            code,
            message: self.to_string(),
        }
    }

    /// Whether this error should never be retried automatically (per §7's
    /// propagation policy for child-process errors inside a recording
    /// session: the session transitions to FAILED, it is not retried).
    pub fn is_terminal_for_session(&self) -> bool {
        matches!(
            self,
            AppError::SpawnFailed(_)
                | AppError::ProcessExitNonZero(_)
                | AppError::ProcessTimeout
                | AppError::ProcessKilled
                | AppError::DeviceNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Recording-specific error carrying session/device/operation context on
/// top of the underlying cause (§4.7). Wrapped in [`AppError::Recording`]
/// so the dispatch boundary still has one exhaustive conversion point.
#[derive(Debug)]
pub struct RecordingError {
    pub session_id: String,
    pub device: String,
    pub operation: String,
    pub message: String,
    pub wrapped: Box<AppError>,
}

impl std::fmt::Display for RecordingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "recording {} failed for session {} (device {}): {}",
            self.operation, self.session_id, self.device, self.message
        )
    }
}

impl std::error::Error for RecordingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.wrapped)
    }
}

impl RecordingError {
    pub fn new(session_id: impl Into<String>, device: impl Into<String>, operation: impl Into<String>, wrapped: AppError) -> Self {
        Self {
            session_id: session_id.into(),
            device: device.into(),
            operation: operation.into(),
            message: wrapped.to_string(),
            wrapped: Box::new(wrapped),
        }
    }
}

impl From<RecordingError> for AppError {
    fn from(e: RecordingError) -> Self {
        AppError::Recording(Box::new(e))
    }
}

/// Predicate for `RecordingError` per §4.7's `is_recording_error`.
pub fn is_recording_error(err: &AppError) -> bool {
    matches!(err, AppError::Recording(_))
}
