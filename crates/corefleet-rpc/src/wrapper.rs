//! Response wrapping for frontend compatibility.
//!
//! The frontend expects every result as `{success: bool, ...data}`. Handlers
//! return the raw orchestrator values; this module puts them in the envelope.

use serde_json::{json, Value};

/// Wrap a handler result in the `{success, ...}` envelope for `method`.
pub fn wrap_response(method: &str, result: Value) -> Value {
    match method {
        // Structured results
        "start_node" => {
            json!({
                "success": true,
                "node": result
            })
        }

        "stop_node" => {
            json!({
                "success": true,
                "report": result
            })
        }

        "cleanup_orphans" => {
            json!({
                "success": true,
                "cleanup": if result.is_null() { json!({}) } else { result }
            })
        }

        // Bulk counts; success means nothing failed
        "start_nodes" | "stop_nodes" => {
            let failed = result.get("failed").and_then(Value::as_u64).unwrap_or(0);
            json!({
                "success": failed == 0,
                "counts": result
            })
        }

        "stop_all_nodes" => {
            json!({
                "success": true,
                "stopped": result.as_u64().unwrap_or(0)
            })
        }

        // Bool queries
        "is_node_running" => {
            json!({
                "success": true,
                "running": result.as_bool().unwrap_or(false)
            })
        }

        // Null when the node is not running
        "get_node_local_port" => {
            json!({
                "success": true,
                "port": result
            })
        }

        // List wrappers
        "get_running_nodes" | "get_node_statuses" => {
            json!({
                "success": true,
                "nodes": if result.is_null() { json!([]) } else { result }
            })
        }

        "reap_crashed" => {
            json!({
                "success": true,
                "reaped": if result.is_null() { json!([]) } else { result }
            })
        }

        "get_notices" => {
            json!({
                "success": true,
                "notices": if result.is_null() { json!([]) } else { result }
            })
        }

        "get_status_events" => {
            json!({
                "success": true,
                "events": if result.is_null() { json!([]) } else { result }
            })
        }

        // Default: put the raw value under `data`
        _ => {
            json!({
                "success": true,
                "data": result
            })
        }
    }
}
