//! JSON-RPC method table (§4.9). One function per method; [`dispatch`] is
//! the single place that resolves a method name to its required role and
//! rate-limit class, then calls the handler and folds its result (or
//! error) into an [`RpcResponse`].

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use crate::auth::{Role, TokenVerifier};
use crate::controller::{Controller, RetentionPolicy};
use crate::error::AppError;
use crate::recording::{RecordingOptions, UseCase};
use crate::snapshot::SnapshotOptions;

use super::connection::{ClientConnection, MethodClass};
use super::metrics::ServerMetrics;
use super::types::{RpcRequest, RpcResponse};

pub struct RpcContext {
    pub controller: Arc<Controller>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub metrics: Arc<ServerMetrics>,
}

/// Errors specific to the dispatch boundary (unknown method, bad params,
/// rate limiting) that sit alongside [`AppError`] rather than inside it —
/// they describe how the envelope was handled, not a domain failure.
enum DispatchError {
    App(AppError),
    MethodNotFound,
    InvalidParams(String),
    RateLimited,
}

impl From<AppError> for DispatchError {
    fn from(e: AppError) -> Self {
        DispatchError::App(e)
    }
}

impl DispatchError {
    fn code_and_message(&self) -> (i64, String) {
        match self {
            DispatchError::App(e) => {
                let rpc = e.rpc_error();
                (rpc.code, rpc.message)
            }
            DispatchError::MethodNotFound => (-32601, "method not found".to_string()),
            DispatchError::InvalidParams(msg) => (-32602, format!("invalid params: {msg}")),
            DispatchError::RateLimited => (-32002, "rate limit exceeded".to_string()),
        }
    }
}

/// Methods reachable without `authenticated=true` (§4.9: "authenticate one
/// method ... populates"). Everything else, including `ping`, requires prior
/// authentication.
fn requires_auth(method: &str) -> bool {
    method != "authenticate"
}

/// RBAC table (§4.9): minimum role required per method. `get_metrics` is
/// deliberately Admin even though the opening paragraph lists "metrics"
/// under viewer — the component's own metrics section states admin only,
/// which is the more specific and later rule.
fn required_role(method: &str) -> Option<Role> {
    match method {
        "ping" | "authenticate" => None,
        "get_camera_list" | "get_camera_status" | "get_camera_capabilities" | "list_recordings" | "list_snapshots"
        | "get_recording_info" | "get_snapshot_info" | "get_status" => Some(Role::Viewer),
        "take_snapshot" | "start_recording" | "stop_recording" | "delete_recording" | "delete_snapshot" => Some(Role::Operator),
        "get_metrics" | "get_server_info" | "get_streams" | "get_storage_info" | "cleanup_old_files" | "set_retention_policy" => {
            Some(Role::Admin)
        }
        _ => None,
    }
}

/// Rate-limit class (§4.9: "keyed by method class, status vs control").
fn method_class(method: &str) -> MethodClass {
    match method {
        "take_snapshot" | "start_recording" | "stop_recording" | "delete_recording" | "delete_snapshot"
        | "cleanup_old_files" | "set_retention_policy" => MethodClass::Control,
        _ => MethodClass::Status,
    }
}

pub async fn dispatch(req: &RpcRequest, conn: &mut ClientConnection, ctx: &RpcContext) -> RpcResponse {
    let id = req.id.clone();
    if req.jsonrpc != "2.0" {
        return RpcResponse::err(id, -32600, "jsonrpc must be \"2.0\"");
    }

    let started = std::time::Instant::now();
    let result = route(&req.method, &req.params, conn, ctx).await;
    let is_error = result.is_err();
    ctx.metrics.record_request(&req.method, started.elapsed(), is_error);

    match result {
        Ok(value) => RpcResponse::ok(id, value),
        Err(e) => {
            let (code, message) = e.code_and_message();
            RpcResponse::err(id, code, message)
        }
    }
}

async fn route(method: &str, params: &Map<String, Value>, conn: &mut ClientConnection, ctx: &RpcContext) -> Result<Value, DispatchError> {
    if method != "authenticate" && !conn.authenticated {
        return Err(DispatchError::App(AppError::AuthRequired));
    }

    if let Some(required) = required_role(method) {
        let role = conn.role.ok_or(DispatchError::App(AppError::AuthRequired))?;
        if !role.satisfies(required) {
            return Err(DispatchError::App(AppError::Forbidden));
        }
    }

    if requires_auth(method) && !conn.take_token(method_class(method)) {
        return Err(DispatchError::RateLimited);
    }

    match method {
        "ping" => Ok(json!({"pong": true})),
        "authenticate" => authenticate(params, conn, ctx).await,
        "get_camera_list" => get_camera_list(ctx).await,
        "get_camera_status" => get_camera_status(params, ctx).await,
        "get_camera_capabilities" => get_camera_capabilities(params, ctx).await,
        "take_snapshot" => take_snapshot(params, ctx).await,
        "start_recording" => start_recording(params, ctx).await,
        "stop_recording" => stop_recording(params, ctx).await,
        "list_recordings" => list_recordings(params, ctx).await,
        "list_snapshots" => list_snapshots(params, ctx).await,
        "get_recording_info" => get_recording_info(params, ctx).await,
        "get_snapshot_info" => get_snapshot_info(params, ctx).await,
        "delete_recording" => delete_recording(params, ctx).await,
        "delete_snapshot" => delete_snapshot(params, ctx).await,
        "get_status" => get_status(ctx).await,
        "get_metrics" => get_metrics(ctx).await,
        "get_server_info" => get_server_info(ctx).await,
        "get_streams" => get_streams(ctx).await,
        "get_storage_info" => get_storage_info(ctx).await,
        "cleanup_old_files" => cleanup_old_files(params, ctx).await,
        "set_retention_policy" => set_retention_policy(params, ctx).await,
        _ => Err(DispatchError::MethodNotFound),
    }
}

fn param_str(params: &Map<String, Value>, key: &str) -> Result<String, DispatchError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| DispatchError::InvalidParams(format!("missing or non-string field `{key}`")))
}

fn param_str_opt(params: &Map<String, Value>, key: &str) -> Option<String> {
    params.get(key).and_then(Value::as_str).map(str::to_string)
}

fn param_u64_opt(params: &Map<String, Value>, key: &str) -> Option<u64> {
    params.get(key).and_then(Value::as_u64)
}

fn param_usize_opt(params: &Map<String, Value>, key: &str) -> Option<usize> {
    params.get(key).and_then(Value::as_u64).map(|v| v as usize)
}

fn param_bool_opt(params: &Map<String, Value>, key: &str) -> Option<bool> {
    params.get(key).and_then(Value::as_bool)
}

async fn authenticate(params: &Map<String, Value>, conn: &mut ClientConnection, ctx: &RpcContext) -> Result<Value, DispatchError> {
    let token = param_str(params, "auth_token")?;
    match ctx.verifier.verify(&token).await {
        Ok(claims) => {
            conn.authenticate(claims.user_id.clone(), claims.role, claims.auth_method.clone());
            Ok(json!({"user_id": claims.user_id, "role": claims.role, "auth_method": claims.auth_method}))
        }
        Err(e) => {
            conn.auth_failures += 1;
            Err(DispatchError::App(e))
        }
    }
}

async fn get_camera_list(ctx: &RpcContext) -> Result<Value, DispatchError> {
    let devices = ctx.controller.get_connected_devices().await;
    Ok(json!(devices
        .iter()
        .map(|d| json!({"path": d.path, "name": d.name, "status": d.status}))
        .collect::<Vec<_>>()))
}

async fn get_camera_status(params: &Map<String, Value>, ctx: &RpcContext) -> Result<Value, DispatchError> {
    let device = param_str(params, "device")?;
    let found = ctx
        .controller
        .get_device(&device)
        .await
        .ok_or_else(|| DispatchError::App(AppError::DeviceNotFound(device.clone())))?;
    Ok(json!({"path": found.path, "status": found.status, "last_error": found.last_error}))
}

async fn get_camera_capabilities(params: &Map<String, Value>, ctx: &RpcContext) -> Result<Value, DispatchError> {
    let device = param_str(params, "device")?;
    let found = ctx
        .controller
        .get_device(&device)
        .await
        .ok_or_else(|| DispatchError::App(AppError::DeviceNotFound(device.clone())))?;
    Ok(json!({"capabilities": found.capabilities, "formats": found.formats}))
}

async fn take_snapshot(params: &Map<String, Value>, ctx: &RpcContext) -> Result<Value, DispatchError> {
    let device = param_str(params, "device")?;
    let prefix = param_str_opt(params, "filename").unwrap_or_else(|| "snapshot".to_string());
    let options = SnapshotOptions {
        format: param_str_opt(params, "format"),
        quality: params.get("quality").and_then(Value::as_u64).map(|v| v as u8),
        max_width: None,
        max_height: None,
        auto_resize: None,
        compression: None,
    };
    let cancel = CancellationToken::new();
    let snapshot = ctx.controller.take_snapshot(&cancel, &device, &prefix, &options).await?;
    Ok(serde_json::to_value(snapshot).map_err(|e| DispatchError::App(AppError::Internal(e.to_string())))?)
}

async fn start_recording(params: &Map<String, Value>, ctx: &RpcContext) -> Result<Value, DispatchError> {
    let device = param_str(params, "device")?;
    let options = RecordingOptions {
        use_case: Some(UseCase::Recording),
        quality: None,
        duration_secs: param_u64_opt(params, "duration"),
        format: param_str_opt(params, "format"),
        continuity_mode: None,
        segment_duration_secs: None,
        max_segments: None,
        audio: param_bool_opt(params, "audio"),
    };
    let session = ctx.controller.start_recording(&device, &options).await?;
    Ok(serde_json::to_value(session).map_err(|e| DispatchError::App(AppError::Internal(e.to_string())))?)
}

async fn stop_recording(params: &Map<String, Value>, ctx: &RpcContext) -> Result<Value, DispatchError> {
    let device = param_str(params, "device")?;
    let session = ctx.controller.stop_recording_by_device(&device).await?;
    Ok(serde_json::to_value(session).map_err(|e| DispatchError::App(AppError::Internal(e.to_string())))?)
}

async fn list_recordings(params: &Map<String, Value>, ctx: &RpcContext) -> Result<Value, DispatchError> {
    let limit = param_usize_opt(params, "limit").unwrap_or(50);
    let offset = param_usize_opt(params, "offset").unwrap_or(0);
    let listing = ctx.controller.list_recordings(limit, offset).await?;
    Ok(serde_json::to_value(listing).map_err(|e| DispatchError::App(AppError::Internal(e.to_string())))?)
}

async fn list_snapshots(params: &Map<String, Value>, ctx: &RpcContext) -> Result<Value, DispatchError> {
    let limit = param_usize_opt(params, "limit").unwrap_or(50);
    let offset = param_usize_opt(params, "offset").unwrap_or(0);
    let (snapshots, total) = ctx.controller.list_snapshots(limit, offset).await;
    Ok(json!({"files": snapshots, "total": total, "limit": limit, "offset": offset}))
}

async fn get_recording_info(params: &Map<String, Value>, ctx: &RpcContext) -> Result<Value, DispatchError> {
    let filename = param_str(params, "filename")?;
    let info = ctx.controller.get_recording_info(&filename).await?;
    Ok(serde_json::to_value(info).map_err(|e| DispatchError::App(AppError::Internal(e.to_string())))?)
}

async fn get_snapshot_info(params: &Map<String, Value>, ctx: &RpcContext) -> Result<Value, DispatchError> {
    let id = param_str(params, "filename")?;
    let snapshot = ctx
        .controller
        .get_snapshot(&id)
        .await
        .ok_or_else(|| DispatchError::App(AppError::FileNotFound(id.clone())))?;
    Ok(serde_json::to_value(snapshot).map_err(|e| DispatchError::App(AppError::Internal(e.to_string())))?)
}

async fn delete_recording(params: &Map<String, Value>, ctx: &RpcContext) -> Result<Value, DispatchError> {
    let filename = param_str(params, "filename")?;
    ctx.controller.delete_recording(&filename).await?;
    Ok(json!({"deleted": true}))
}

async fn delete_snapshot(params: &Map<String, Value>, ctx: &RpcContext) -> Result<Value, DispatchError> {
    let id = param_str(params, "filename")?;
    ctx.controller.delete_snapshot(&id).await?;
    Ok(json!({"deleted": true}))
}

async fn get_status(ctx: &RpcContext) -> Result<Value, DispatchError> {
    let health = ctx.controller.get_health_status().await;
    let device_stats = ctx.controller.get_device_stats().await;
    Ok(json!({
        "running": ctx.controller.is_running(),
        "health": {
            "state": health.state,
            "consecutive_failures": health.consecutive_failures,
            "last_success_time": health.last_success_time,
            "circuit_open": health.circuit_open,
        },
        "devices": device_stats,
    }))
}

async fn get_metrics(ctx: &RpcContext) -> Result<Value, DispatchError> {
    Ok(serde_json::to_value(ctx.metrics.snapshot()).map_err(|e| DispatchError::App(AppError::Internal(e.to_string())))?)
}

async fn get_server_info(ctx: &RpcContext) -> Result<Value, DispatchError> {
    Ok(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "running": ctx.controller.is_running(),
    }))
}

async fn get_streams(ctx: &RpcContext) -> Result<Value, DispatchError> {
    let streams = ctx.controller.get_streams().await?;
    Ok(serde_json::to_value(streams).map_err(|e| DispatchError::App(AppError::Internal(e.to_string())))?)
}

async fn get_storage_info(ctx: &RpcContext) -> Result<Value, DispatchError> {
    let snapshot = ctx.controller.get_storage_info().await?;
    Ok(serde_json::to_value(snapshot).map_err(|e| DispatchError::App(AppError::Internal(e.to_string())))?)
}

async fn cleanup_old_files(params: &Map<String, Value>, ctx: &RpcContext) -> Result<Value, DispatchError> {
    let max_age = param_u64_opt(params, "max_age").map(std::time::Duration::from_secs);
    let max_size = param_usize_opt(params, "max_size");
    let dry_run = param_bool_opt(params, "dry_run").unwrap_or(false);
    let removed = ctx.controller.cleanup_old_files(max_age, max_size, dry_run).await?;
    Ok(json!({"removed": removed, "dry_run": dry_run}))
}

async fn set_retention_policy(params: &Map<String, Value>, ctx: &RpcContext) -> Result<Value, DispatchError> {
    let enabled = param_bool_opt(params, "enabled").unwrap_or(true);
    let policy = RetentionPolicy {
        enabled,
        max_age_days: params.get("max_age_days").and_then(Value::as_u64).map(|v| v as u32),
        max_count: param_usize_opt(params, "max_size"),
    };
    ctx.controller.set_retention_policy(policy);
    Ok(json!({"applied": true}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_role_overrides_get_metrics_to_admin() {
        assert_eq!(required_role("get_metrics"), Some(Role::Admin));
        assert_eq!(required_role("get_status"), Some(Role::Viewer));
    }

    #[test]
    fn ping_and_authenticate_need_no_prior_role() {
        assert_eq!(required_role("ping"), None);
        assert_eq!(required_role("authenticate"), None);
    }

    #[test]
    fn control_methods_are_rate_limited_separately_from_status() {
        assert_eq!(method_class("start_recording"), MethodClass::Control);
        assert_eq!(method_class("get_camera_list"), MethodClass::Status);
    }
}
