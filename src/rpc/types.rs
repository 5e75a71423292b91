//! JSON-RPC 2.0 envelope (§3, §6). The request `id` is a closed sum of
//! integer or string, round-tripping with numeric ids preserved as numeric
//! (§8 property 6) rather than collapsed to strings.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(i64),
    String(String),
}

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub id: Option<RpcId>,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl RpcRequest {
    /// A request with no `id` is a notification (§3); this service's wire
    /// contract has clients always send requests (never notifications) but
    /// the dispatcher honors the JSON-RPC rule regardless.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Option<RpcId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

#[derive(Debug, Serialize)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcResponse {
    pub fn ok(id: Option<RpcId>, result: Value) -> Self {
        Self { jsonrpc: "2.0", id, result: Some(result), error: None }
    }

    pub fn err(id: Option<RpcId>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcErrorBody { code, message: message.into(), data: None }),
        }
    }

    /// Standard JSON-RPC parse error (§7): produced only when the `id`
    /// could not even be recovered from a malformed frame. Callers that can
    /// recover no id close the connection instead of sending this.
    pub fn parse_error() -> Self {
        Self::err(None, -32700, "parse error")
    }
}

/// Server-initiated notification (§3, §4.9): a request-shaped message with
/// no `id`, used for `camera_status_update` / `recording_status_update`
/// broadcasts.
#[derive(Debug, Serialize)]
pub struct RpcNotification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    pub params: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_id_round_trips_as_numeric() {
        let req: RpcRequest = serde_json::from_str(r#"{"jsonrpc":"2.0","method":"ping","id":7}"#).unwrap();
        assert_eq!(req.id, Some(RpcId::Number(7)));

        let resp = RpcResponse::ok(req.id, Value::Null);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["id"], serde_json::json!(7));
    }

    #[test]
    fn string_id_round_trips_as_string() {
        let req: RpcRequest = serde_json::from_str(r#"{"jsonrpc":"2.0","method":"ping","id":"abc"}"#).unwrap();
        assert_eq!(req.id, Some(RpcId::String("abc".to_string())));
    }

    #[test]
    fn missing_id_is_a_notification() {
        let req: RpcRequest = serde_json::from_str(r#"{"jsonrpc":"2.0","method":"ping"}"#).unwrap();
        assert!(req.is_notification());
    }
}
