//! JSON-RPC request parsing

use serde_json::Value;

use crate::error::rpc_codes;
use crate::protocol::{JsonRpcResponse, RequestId};

/// Parsed request: (id, method, params); id is `None` for notifications
pub(crate) type ParsedRequest = (Option<RequestId>, String, Option<Value>);

/// Extract a `RequestId` from a JSON value.
///
/// Supports string and integer ID values.
/// Returns `None` if the value is not a recognised ID type.
pub(crate) fn extract_request_id(value: &Value) -> Option<RequestId> {
    if let Some(s) = value.as_str() {
        Some(RequestId::String(s.to_string()))
    } else if let Some(n) = value.as_i64() {
        Some(RequestId::Number(n))
    } else {
        value
            .as_u64()
            .and_then(|n| i64::try_from(n).ok())
            .map(RequestId::Number)
    }
}

/// Check whether a method name represents a notification (no response expected).
pub(crate) fn is_notification_method(method: &str) -> bool {
    method.starts_with("notifications/")
}

/// Parse JSON-RPC request or notification
#[allow(clippy::result_large_err)]
pub(crate) fn parse_request(value: &Value) -> Result<ParsedRequest, JsonRpcResponse> {
    let jsonrpc = value.get("jsonrpc").and_then(Value::as_str);
    if jsonrpc != Some("2.0") {
        return Err(JsonRpcResponse::error(
            None,
            rpc_codes::INVALID_REQUEST,
            "Invalid JSON-RPC version",
        ));
    }

    // Required for requests, absent for notifications
    let id = value.get("id").and_then(extract_request_id);

    let method = value
        .get("method")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            JsonRpcResponse::error(id.clone(), rpc_codes::INVALID_REQUEST, "Missing method")
        })?;

    let params = value.get("params").cloned();

    if !is_notification_method(method) && id.is_none() {
        return Err(JsonRpcResponse::error(
            None,
            rpc_codes::INVALID_REQUEST,
            "Missing id",
        ));
    }

    Ok((id, method.to_string(), params))
}
