//! Node lifecycle and query handlers.

use super::{require_param, require_str_param};
use crate::server::AppState;
use corefleet_core::NodeProfile;
use serde_json::{json, Value};
use tracing::info;

pub async fn start_node(state: &AppState, params: &Value) -> corefleet_core::Result<Value> {
    let profile: NodeProfile = require_param(params, "profile", "profile")?;
    let started = state.fleet.start_node_detailed(&profile).await?;
    Ok(serde_json::to_value(started)?)
}

pub async fn start_nodes(state: &AppState, params: &Value) -> corefleet_core::Result<Value> {
    let profiles: Vec<NodeProfile> = require_param(params, "profiles", "profiles")?;
    let result = state.fleet.start_nodes(&profiles).await;
    Ok(serde_json::to_value(result)?)
}

pub async fn stop_node(state: &AppState, params: &Value) -> corefleet_core::Result<Value> {
    let index_id = require_str_param(params, "index_id", "indexId")?;
    let report = state.fleet.stop_node_detailed(&index_id).await?;
    Ok(serde_json::to_value(report)?)
}

pub async fn stop_nodes(state: &AppState, params: &Value) -> corefleet_core::Result<Value> {
    let index_ids: Vec<String> = require_param(params, "index_ids", "indexIds")?;
    let result = state.fleet.stop_nodes(&index_ids).await;
    Ok(serde_json::to_value(result)?)
}

pub async fn stop_all_nodes(state: &AppState, _params: &Value) -> corefleet_core::Result<Value> {
    let stopped = state.fleet.stop_all_nodes().await;
    Ok(json!(stopped))
}

pub async fn is_node_running(state: &AppState, params: &Value) -> corefleet_core::Result<Value> {
    let index_id = require_str_param(params, "index_id", "indexId")?;
    Ok(json!(state.fleet.is_node_running(&index_id)))
}

pub async fn get_node_local_port(
    state: &AppState,
    params: &Value,
) -> corefleet_core::Result<Value> {
    let index_id = require_str_param(params, "index_id", "indexId")?;
    Ok(json!(state.fleet.get_node_local_port(&index_id)))
}

pub async fn get_running_nodes(state: &AppState, _params: &Value) -> corefleet_core::Result<Value> {
    Ok(json!(state.fleet.running_node_ids()))
}

pub async fn get_node_statuses(state: &AppState, _params: &Value) -> corefleet_core::Result<Value> {
    // Sampling refreshes the whole process table; keep it off the runtime threads
    let fleet = state.fleet.clone();
    let statuses = tokio::task::spawn_blocking(move || fleet.node_statuses())
        .await
        .map_err(|e| corefleet_core::FleetError::Other(format!("Status task failed: {}", e)))?;
    Ok(serde_json::to_value(statuses)?)
}

pub async fn reap_crashed(state: &AppState, _params: &Value) -> corefleet_core::Result<Value> {
    let reaped = state.fleet.reap_crashed().await;
    if !reaped.is_empty() {
        info!("Reaped {} crashed nodes", reaped.len());
    }
    Ok(json!(reaped))
}

pub async fn cleanup_orphans(state: &AppState, _params: &Value) -> corefleet_core::Result<Value> {
    let cleanup = state.fleet.cleanup_orphans().await?;
    Ok(serde_json::to_value(cleanup)?)
}
