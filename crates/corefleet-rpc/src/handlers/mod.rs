//! JSON-RPC request handlers, split by domain.

mod nodes;
mod status;

use crate::server::AppState;
use crate::wrapper::wrap_response;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use corefleet_core::FleetError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

// ============================================================================
// JSON-RPC types
// ============================================================================

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    pub id: Option<Value>,
}

impl JsonRpcRequest {
    /// `Invalid Request` response for anything that is not JSON-RPC 2.0.
    pub fn version_error(&self) -> Option<JsonRpcResponse> {
        (self.jsonrpc != "2.0").then(|| {
            JsonRpcResponse::error(
                self.id.clone(),
                -32600,
                format!("Invalid Request: unsupported jsonrpc version {:?}", self.jsonrpc),
            )
        })
    }
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 error structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }
}

// ============================================================================
// Parameter extraction helpers
// ============================================================================

/// Extract an optional string parameter, supporting both snake_case and camelCase.
pub(crate) fn get_str_param<'a>(params: &'a Value, snake: &str, camel: &str) -> Option<&'a str> {
    params
        .get(snake)
        .or_else(|| params.get(camel))
        .and_then(|v| v.as_str())
}

/// Extract a required string parameter or return an error.
pub(crate) fn require_str_param(
    params: &Value,
    snake: &str,
    camel: &str,
) -> corefleet_core::Result<String> {
    get_str_param(params, snake, camel)
        .map(String::from)
        .ok_or_else(|| FleetError::InvalidParams {
            message: format!("Missing required parameter: {}", snake),
        })
}

/// Extract a required parameter of any deserializable type.
pub(crate) fn require_param<T: serde::de::DeserializeOwned>(
    params: &Value,
    snake: &str,
    camel: &str,
) -> corefleet_core::Result<T> {
    let raw = params
        .get(snake)
        .or_else(|| params.get(camel))
        .ok_or_else(|| FleetError::InvalidParams {
            message: format!("Missing required parameter: {}", snake),
        })?;

    serde_json::from_value(raw.clone()).map_err(|e| FleetError::InvalidParams {
        message: format!("Invalid {}: {}", snake, e),
    })
}

// ============================================================================
// HTTP endpoints
// ============================================================================

/// Health check endpoint.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Main JSON-RPC handler.
pub async fn handle_rpc(
    State(state): State<Arc<AppState>>,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    if let Some(response) = request.version_error() {
        warn!("Rejected {} request with jsonrpc {:?}", request.method, request.jsonrpc);
        return (StatusCode::OK, Json(response));
    }

    let method = &request.method;
    let params = request.params.unwrap_or(Value::Object(Default::default()));
    let id = request.id.clone();

    debug!("RPC call: {}({:?})", method, params);

    // Handle built-in methods
    if method == "health_check" {
        return (
            StatusCode::OK,
            Json(JsonRpcResponse::success(id, json!({"status": "ok"}))),
        );
    }

    if method == "shutdown" {
        info!("Shutdown requested");
        // notify_one stores a permit, so the request is not lost if main
        // has not started waiting yet
        state.shutdown.notify_one();
        return (
            StatusCode::OK,
            Json(JsonRpcResponse::success(
                id,
                json!({"status": "shutting_down"}),
            )),
        );
    }

    // Dispatch to API methods
    let result = dispatch_method(&state, method, &params).await;

    match result {
        Ok(value) => {
            let wrapped = wrap_response(method, value);
            (StatusCode::OK, Json(JsonRpcResponse::success(id, wrapped)))
        }
        Err(e) => {
            error!("RPC error for {}: {}", method, e);
            let code = e.to_rpc_error_code();
            (
                StatusCode::OK,
                Json(JsonRpcResponse::error(id, code, e.to_string())),
            )
        }
    }
}

// ============================================================================
// Method dispatcher
// ============================================================================

/// Dispatch a method call to the appropriate domain handler.
async fn dispatch_method(
    state: &AppState,
    method: &str,
    params: &Value,
) -> corefleet_core::Result<Value> {
    match method {
        // Node lifecycle
        "start_node" => nodes::start_node(state, params).await,
        "start_nodes" => nodes::start_nodes(state, params).await,
        "stop_node" => nodes::stop_node(state, params).await,
        "stop_nodes" => nodes::stop_nodes(state, params).await,
        "stop_all_nodes" => nodes::stop_all_nodes(state, params).await,

        // Node queries
        "is_node_running" => nodes::is_node_running(state, params).await,
        "get_node_local_port" => nodes::get_node_local_port(state, params).await,
        "get_running_nodes" => nodes::get_running_nodes(state, params).await,
        "get_node_statuses" => nodes::get_node_statuses(state, params).await,

        // Maintenance
        "reap_crashed" => nodes::reap_crashed(state, params).await,
        "cleanup_orphans" => nodes::cleanup_orphans(state, params).await,

        // Notices & events
        "get_notices" => status::get_notices(state, params).await,
        "get_status_events" => status::get_status_events(state, params).await,

        // Unknown method
        _ => {
            warn!("Method not found: {}", method);
            Err(FleetError::Other(format!("Method not found: {}", method)))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
