//! Notice and status-event polling handlers.

use crate::server::AppState;
use serde_json::Value;

pub async fn get_notices(state: &AppState, _params: &Value) -> corefleet_core::Result<Value> {
    Ok(serde_json::to_value(state.notices.drain())?)
}

pub async fn get_status_events(
    state: &AppState,
    _params: &Value,
) -> corefleet_core::Result<Value> {
    Ok(serde_json::to_value(state.events.drain())?)
}
