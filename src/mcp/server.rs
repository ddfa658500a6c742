//! The central Model Context Protocol dispatcher
//!
//! Decodes host JSON-RPC messages, answers `initialize` locally, runs the
//! args-update tool, and hands every other known method to the relay for
//! forwarding.

use std::time::Instant;

use rust_mcp_sdk::schema::{CallToolRequestParams, JsonrpcMessage};
use serde_json::{json, Value};
use tracing::debug;

use crate::errors::RelayError;
use crate::logging::log_request_summary;
use crate::mcp::{
    methods::ForwardedMethod,
    rpc::{
        is_json_rpc_error, json_rpc_error, json_rpc_result, relay_error_to_json_rpc,
        request_id_to_value, INVALID_REQUEST, METHOD_NOT_FOUND,
    },
};
use crate::relay::Relay;

pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";
pub const SUPPORTED_PROTOCOL_VERSIONS: [&str; 3] = ["2025-06-18", "2025-03-26", "2024-11-05"];

pub async fn handle_json_rpc_value(relay: &Relay, payload: Value) -> Option<Value> {
    if !payload.is_object() {
        return Some(json_rpc_error(None, INVALID_REQUEST, "Invalid Request"));
    }

    let request_id = payload.get("id").cloned();
    let parsed: JsonrpcMessage = match serde_json::from_value(payload) {
        Ok(message) => message,
        Err(_) => return Some(json_rpc_error(request_id, INVALID_REQUEST, "Invalid Request")),
    };

    match parsed {
        JsonrpcMessage::Request(request) => {
            let request_id = request_id_to_value(request.id);
            if request.method.trim().is_empty() {
                return Some(json_rpc_error(Some(request_id), INVALID_REQUEST, "Invalid Request"));
            }

            Some(
                handle_json_rpc_request(
                    relay,
                    Some(request_id),
                    request.method,
                    request.params.map(Value::Object),
                )
                .await,
            )
        }
        JsonrpcMessage::Notification(notification) => {
            match notification.method.as_str() {
                "notifications/initialized" => debug!("host finished initialization"),
                method => debug!(method, "dropping host notification"),
            }
            None
        }
        JsonrpcMessage::ResultResponse(_) | JsonrpcMessage::ErrorResponse(_) => {
            debug!(id = ?request_id, "ignoring response sent by host");
            None
        }
    }
}

pub async fn handle_json_rpc_request(
    relay: &Relay,
    id: Option<Value>,
    method: String,
    params: Option<Value>,
) -> Value {
    let started_at = Instant::now();
    let is_update_call =
        method == "tools/call" && relay.update_tool().is_called_by(params.as_ref());
    let audit_params = if is_update_call {
        json!({ "name": relay.update_tool().name(), "arguments": "[REDACTED]" })
    } else {
        redact_audit_params(params.as_ref())
    };

    let response = if method == "initialize" {
        handle_initialize(relay, id, params).await
    } else if is_update_call {
        match handle_update_call(relay, params).await {
            Ok(result) => json_rpc_result(id, result),
            Err(err) => relay_error_to_json_rpc(id, err),
        }
    } else if let Some(forwarded) = ForwardedMethod::from_name(&method) {
        match relay.forward(forwarded, params.as_ref()).await {
            Ok(result) => json_rpc_result(id, result),
            Err(err) => relay_error_to_json_rpc(id, err),
        }
    } else {
        json_rpc_error(id, METHOD_NOT_FOUND, "Method not found")
    };

    log_request_summary(&method, &audit_params, is_json_rpc_error(&response), started_at);

    response
}

async fn handle_update_call(relay: &Relay, params: Option<Value>) -> Result<Value, RelayError> {
    let raw_params =
        params.ok_or_else(|| RelayError::invalid_params("tools/call params are required"))?;
    let tool_call: CallToolRequestParams = serde_json::from_value(raw_params)
        .map_err(|err| RelayError::invalid_params(format!("malformed tools/call params: {err}")))?;

    relay.update_args(tool_call.arguments.as_ref()).await
}

async fn handle_initialize(relay: &Relay, id: Option<Value>, params: Option<Value>) -> Value {
    let protocol_version = match negotiate_protocol_version(params.as_ref()) {
        Ok(version) => version,
        Err(err) => return relay_error_to_json_rpc(id, err),
    };
    relay.remember_client_init(params).await;

    json_rpc_result(
        id,
        json!({
            "protocolVersion": protocol_version,
            "serverInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION")
            },
            "capabilities": {
                "tools": { "listChanged": true },
                "prompts": { "listChanged": true },
                "resources": { "subscribe": true, "listChanged": true },
                "logging": {},
                "completions": {}
            }
        }),
    )
}

/// Echoes a supported requested version, otherwise offers the latest one.
pub fn negotiate_protocol_version(params: Option<&Value>) -> Result<&'static str, RelayError> {
    let offered_version = params
        .and_then(Value::as_object)
        .and_then(|object| object.get("protocolVersion"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|version| !version.is_empty())
        .ok_or_else(|| {
            RelayError::invalid_params("initialize params.protocolVersion is required")
        })?;

    Ok(SUPPORTED_PROTOCOL_VERSIONS
        .into_iter()
        .find(|supported| *supported == offered_version)
        .unwrap_or(LATEST_PROTOCOL_VERSION))
}

pub fn redact_audit_params(params: Option<&Value>) -> Value {
    params.map(redact_audit_value).unwrap_or(Value::Null)
}

pub fn redact_audit_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| {
                    if is_sensitive_key(key) {
                        (key.clone(), Value::String("[REDACTED]".to_string()))
                    } else {
                        (key.clone(), redact_audit_value(item))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_audit_value).collect()),
        _ => value.clone(),
    }
}

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_ascii_lowercase();
    matches!(
        normalized.as_str(),
        "authorization" | "bearer" | "api_key" | "apikey"
    ) || normalized.contains("token")
        || normalized.contains("secret")
        || normalized.contains("password")
        || normalized.contains("credential")
}
