//! Result types returned by the orchestrator and serialized by the RPC layer.

use super::CoreType;
use serde::{Deserialize, Serialize};

/// A node that was started successfully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartedNode {
    pub index_id: String,
    pub local_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub core_type: CoreType,
}

/// Outcome of stopping a node.
///
/// Removing the per-node config is best-effort; a failure there does not make
/// the stop fail but is reported here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopReport {
    pub index_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_warning: Option<String>,
}

/// Aggregate counts for bulk start/stop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkResult {
    pub success: usize,
    pub failed: usize,
}

impl BulkResult {
    pub fn record(&mut self, ok: bool) {
        if ok {
            self.success += 1;
        } else {
            self.failed += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.success + self.failed
    }
}

/// Snapshot of one registered node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub index_id: String,
    pub summary: String,
    pub core_type: CoreType,
    pub local_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// False once the core has exited but before the entry is reaped.
    pub running: bool,
    pub uptime_secs: u64,
    /// CPU usage percentage (can exceed 100 on multi-core).
    pub cpu: f32,
    pub ram_bytes: u64,
}

/// What a startup orphan sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanCleanup {
    pub processes_stopped: u32,
    pub configs_removed: u32,
}
