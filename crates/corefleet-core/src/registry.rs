//! Running node registry.
//!
//! The registry is the single source of truth for which nodes run where. It
//! guarantees at most one entry per index id and that no two live entries (or
//! in-flight reservations) bind the same port. Entries whose core has exited
//! stay until they are stopped or reaped, but never count as running and never
//! hold their port.

use crate::models::{CoreType, NodeProfile};
use crate::process::CoreProcess;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

/// A node with a spawned core.
#[derive(Debug)]
pub struct RunningInstance {
    pub process: CoreProcess,
    pub local_port: u16,
    /// Consecutive ports bound from `local_port` on, at least 1.
    pub port_span: u16,
    pub profile: NodeProfile,
    pub core_type: CoreType,
    pub config_path: PathBuf,
    pub started_at: DateTime<Utc>,
}

impl RunningInstance {
    pub fn index_id(&self) -> &str {
        &self.profile.index_id
    }

    pub fn is_alive(&self) -> bool {
        !self.process.has_exited()
    }

    /// Every port this node binds.
    pub fn ports(&self) -> impl Iterator<Item = u16> {
        span_ports(self.local_port, self.port_span)
    }
}

fn span_ports(port: u16, span: u16) -> impl Iterator<Item = u16> {
    (0..span.max(1)).filter_map(move |offset| port.checked_add(offset))
}

/// Result of [`NodeRegistry::insert_if_absent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// An entry for this id exists (live or not yet reaped).
    AlreadyPresent,
    /// Another live node or in-flight start holds the port.
    PortTaken { holder: String },
}

#[derive(Debug, Default)]
struct RegistryState {
    entries: HashMap<String, Arc<RunningInstance>>,
    /// Ports claimed by starts that have not inserted yet, keyed to their id.
    reservations: HashMap<u16, String>,
}

impl RegistryState {
    /// Who, other than `index_id`, holds `port`.
    fn port_holder(&self, port: u16, index_id: &str) -> Option<String> {
        if let Some(owner) = self.reservations.get(&port) {
            if owner != index_id {
                return Some(owner.clone());
            }
        }
        self.entries
            .iter()
            .find(|(id, instance)| {
                id.as_str() != index_id
                    && instance.is_alive()
                    && instance.ports().any(|held| held == port)
            })
            .map(|(id, _)| id.clone())
    }

    fn span_holder(&self, port: u16, span: u16, index_id: &str) -> Option<String> {
        span_ports(port, span).find_map(|port| self.port_holder(port, index_id))
    }
}

/// Thread-safe map of index id to running instance.
#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomically insert unless the id is present or the port is held elsewhere.
    ///
    /// A successful insert consumes the id's reservations for its ports.
    pub fn insert_if_absent(&self, instance: Arc<RunningInstance>) -> InsertOutcome {
        let mut state = self.write();
        let index_id = instance.index_id().to_string();

        if state.entries.contains_key(&index_id) {
            return InsertOutcome::AlreadyPresent;
        }
        if let Some(holder) = state.span_holder(instance.local_port, instance.port_span, &index_id)
        {
            return InsertOutcome::PortTaken { holder };
        }

        for port in instance.ports() {
            if state.reservations.get(&port) == Some(&index_id) {
                state.reservations.remove(&port);
            }
        }
        debug!("Registered node {} on port {}", index_id, instance.local_port);
        state.entries.insert(index_id, instance);
        InsertOutcome::Inserted
    }

    pub fn remove(&self, index_id: &str) -> Option<Arc<RunningInstance>> {
        self.write().entries.remove(index_id)
    }

    /// Remove the entry only if its core has exited.
    pub fn remove_if_exited(&self, index_id: &str) -> Option<Arc<RunningInstance>> {
        let mut state = self.write();
        let exited = state
            .entries
            .get(index_id)
            .is_some_and(|instance| !instance.is_alive());
        if exited {
            state.entries.remove(index_id)
        } else {
            None
        }
    }

    pub fn get(&self, index_id: &str) -> Option<Arc<RunningInstance>> {
        self.read().entries.get(index_id).cloned()
    }

    /// Every registered id, live or not yet reaped.
    pub fn list_ids(&self) -> HashSet<String> {
        self.read().entries.keys().cloned().collect()
    }

    /// Snapshot of every entry.
    pub fn entries(&self) -> Vec<Arc<RunningInstance>> {
        self.read().entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    /// True only when an entry exists and its core is still alive.
    pub fn is_running(&self, index_id: &str) -> bool {
        self.read()
            .entries
            .get(index_id)
            .is_some_and(|instance| instance.is_alive())
    }

    /// Port of a live entry.
    pub fn local_port(&self, index_id: &str) -> Option<u16> {
        self.read()
            .entries
            .get(index_id)
            .filter(|instance| instance.is_alive())
            .map(|instance| instance.local_port)
    }

    pub fn live_ports(&self) -> HashSet<u16> {
        self.read()
            .entries
            .values()
            .filter(|instance| instance.is_alive())
            .map(|instance| instance.local_port)
            .collect()
    }

    /// Every port bound by a live entry plus in-flight reservations.
    pub fn held_ports(&self) -> HashSet<u16> {
        let state = self.read();
        let mut ports: HashSet<u16> = state
            .entries
            .values()
            .filter(|instance| instance.is_alive())
            .flat_map(|instance| instance.ports())
            .collect();
        ports.extend(state.reservations.keys().copied());
        ports
    }

    /// Ids whose core has exited but which are still registered.
    pub fn exited_ids(&self) -> Vec<String> {
        self.read()
            .entries
            .iter()
            .filter(|(_, instance)| !instance.is_alive())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Claim `span` ports starting at `port` for a start of `index_id` that
    /// is in flight.
    ///
    /// Returns `None` if another node holds or has reserved any of them.
    pub fn reserve_ports(&self, index_id: &str, port: u16, span: u16) -> Option<PortReservation> {
        let mut state = self.write();
        if state.span_holder(port, span, index_id).is_some() {
            return None;
        }
        let ports: Vec<u16> = span_ports(port, span).collect();
        for &port in &ports {
            state.reservations.insert(port, index_id.to_string());
        }
        Some(PortReservation {
            state: Arc::clone(&self.state),
            index_id: index_id.to_string(),
            port,
            ports,
        })
    }
}

/// Releases its port reservations on drop unless an insert consumed them.
#[derive(Debug)]
pub struct PortReservation {
    state: Arc<RwLock<RegistryState>>,
    index_id: String,
    port: u16,
    ports: Vec<u16>,
}

impl PortReservation {
    /// Primary port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortReservation {
    fn drop(&mut self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        for port in &self.ports {
            if state.reservations.get(port) == Some(&self.index_id) {
                state.reservations.remove(port);
            }
        }
    }
}

/// Per-id async locks so operations on one node serialize while different
/// nodes proceed concurrently.
#[derive(Debug, Default)]
pub struct NodeLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl NodeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, index_id: &str) -> NodeLockGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(index_id.to_string()).or_default())
        };
        let guard = Arc::clone(&lock).lock_owned().await;
        NodeLockGuard {
            owner: self,
            index_id: index_id.to_string(),
            lock,
            guard: Some(guard),
        }
    }

    /// Take the lock for `index_id` only if nobody holds it right now.
    pub fn try_lock(&self, index_id: &str) -> Option<NodeLockGuard<'_>> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(index_id.to_string()).or_default())
        };
        let guard = Arc::clone(&lock).try_lock_owned().ok()?;
        Some(NodeLockGuard {
            owner: self,
            index_id: index_id.to_string(),
            lock,
            guard: Some(guard),
        })
    }

    /// Number of ids with a lock currently allocated.
    pub fn active(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Held for the duration of one operation on a node.
#[derive(Debug)]
pub struct NodeLockGuard<'a> {
    owner: &'a NodeLocks,
    index_id: String,
    lock: Arc<tokio::sync::Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for NodeLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self
            .owner
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Map entry plus ours; anything more is a waiter.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.index_id);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::ReadinessProbe;
    use crate::process::{LaunchSpec, ProcessSupervisor};
    use std::time::Duration;
    use tempfile::TempDir;

    async fn spawn_instance(dir: &TempDir, id: &str, port: u16, script: &str) -> Arc<RunningInstance> {
        let spec = LaunchSpec::new(id, "/bin/sh", dir.path(), port)
            .with_arg("-c")
            .with_arg(script);
        let process = ProcessSupervisor::new()
            .start(&spec, &ReadinessProbe::Grace { delay_ms: 20 })
            .await
            .unwrap();

        Arc::new(RunningInstance {
            process,
            local_port: port,
            port_span: 1,
            profile: NodeProfile::new(id, CoreType::Xray),
            core_type: CoreType::Xray,
            config_path: dir.path().join(format!("multicore_{}.json", id)),
            started_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_insert_if_absent() {
        let dir = TempDir::new().unwrap();
        let registry = NodeRegistry::new();

        let a = spawn_instance(&dir, "a", 1180, "exec sleep 30").await;
        assert_eq!(registry.insert_if_absent(Arc::clone(&a)), InsertOutcome::Inserted);
        assert!(registry.is_running("a"));
        assert_eq!(registry.local_port("a"), Some(1180));

        let again = spawn_instance(&dir, "a", 1181, "exec sleep 30").await;
        assert_eq!(registry.insert_if_absent(again), InsertOutcome::AlreadyPresent);

        let b = spawn_instance(&dir, "b", 1180, "exec sleep 30").await;
        assert_eq!(
            registry.insert_if_absent(b),
            InsertOutcome::PortTaken {
                holder: "a".to_string()
            }
        );

        assert_eq!(registry.list_ids(), HashSet::from(["a".to_string()]));
        assert!(registry.remove("a").is_some());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_exited_entry_is_not_running() {
        let dir = TempDir::new().unwrap();
        let registry = NodeRegistry::new();

        let a = spawn_instance(&dir, "a", 1180, "sleep 0.2").await;
        registry.insert_if_absent(a);
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(!registry.is_running("a"));
        assert_eq!(registry.local_port("a"), None);
        assert!(registry.live_ports().is_empty());
        assert_eq!(registry.exited_ids(), vec!["a".to_string()]);
        assert!(registry.list_ids().contains("a"));

        assert!(registry.remove_if_exited("a").is_some());
        assert!(registry.get("a").is_none());
    }

    #[test]
    fn test_port_reservation_lifecycle() {
        let registry = NodeRegistry::new();

        let reservation = registry.reserve_ports("a", 1180, 1).unwrap();
        assert_eq!(reservation.port(), 1180);
        assert!(registry.held_ports().contains(&1180));
        assert!(registry.reserve_ports("b", 1180, 1).is_none());

        drop(reservation);
        assert!(registry.held_ports().is_empty());
        assert!(registry.reserve_ports("b", 1180, 1).is_some());
    }

    #[tokio::test]
    async fn test_insert_consumes_reservation() {
        let dir = TempDir::new().unwrap();
        let registry = NodeRegistry::new();

        let reservation = registry.reserve_ports("a", 1180, 1).unwrap();
        let a = spawn_instance(&dir, "a", 1180, "exec sleep 30").await;
        assert_eq!(registry.insert_if_absent(a), InsertOutcome::Inserted);
        drop(reservation);

        // Still held by the live entry.
        assert!(registry.held_ports().contains(&1180));
        assert!(registry.reserve_ports("b", 1180, 1).is_none());
    }

    #[test]
    fn test_span_reservation_blocks_offset_ports() {
        let registry = NodeRegistry::new();

        let reservation = registry.reserve_ports("a", 1180, 3).unwrap();
        assert_eq!(reservation.port(), 1180);
        assert_eq!(registry.held_ports(), HashSet::from([1180, 1181, 1182]));
        assert!(registry.reserve_ports("b", 1182, 1).is_none());
        assert!(registry.reserve_ports("b", 1178, 3).is_none());
        assert!(registry.reserve_ports("b", 1183, 2).is_some());

        drop(reservation);
        assert!(registry.reserve_ports("c", 1181, 1).is_some());
    }

    #[tokio::test]
    async fn test_live_entry_holds_its_span() {
        let dir = TempDir::new().unwrap();
        let registry = NodeRegistry::new();

        let mut a = spawn_instance(&dir, "a", 1180, "exec sleep 30").await;
        Arc::get_mut(&mut a).unwrap().port_span = 2;
        assert_eq!(registry.insert_if_absent(a), InsertOutcome::Inserted);
        assert!(registry.held_ports().contains(&1181));

        let b = spawn_instance(&dir, "b", 1181, "exec sleep 30").await;
        assert_eq!(
            registry.insert_if_absent(b),
            InsertOutcome::PortTaken {
                holder: "a".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_try_lock_skips_busy_id() {
        let locks = NodeLocks::new();

        let guard = locks.lock("a").await;
        assert!(locks.try_lock("a").is_none());
        assert_eq!(locks.active(), 1);

        drop(guard);
        let retaken = locks.try_lock("a");
        assert!(retaken.is_some());
        drop(retaken);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_node_locks_serialize_same_id() {
        let locks = Arc::new(NodeLocks::new());

        let guard = locks.lock("a").await;
        let other = locks.lock("b").await;
        assert_eq!(locks.active(), 2);
        drop(other);
        assert_eq!(locks.active(), 1);

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.lock("a").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert_eq!(locks.active(), 0);
    }
}
