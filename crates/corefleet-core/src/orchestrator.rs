//! Orchestrator facade.
//!
//! Coordinates the allocator, config generator, core-info table, supervisor,
//! registry and notifier. Every public operation reports its outcome through
//! the injected [`NoticeSink`]; the bool-returning variants never fail, the
//! `_detailed` variants hand back the typed error as well.
//!
//! Per-node states: `Stopped -> Starting -> Running -> Stopping -> Stopped`,
//! plus `Crashed`, detected lazily from `Running` when the core has exited.

use crate::allocator::{ListenerProbe, PortAllocator, SystemListenerProbe};
use crate::config::{
    index_id_from_config_file_name, validate_index_id, FleetConfig, PathsConfig,
};
use crate::config_gen::{ConfigGenerator, InboundConfigGenerator};
use crate::core_info::{BuiltinCoreInfo, CoreInfoProvider};
use crate::error::{FleetError, Result};
use crate::models::{BulkResult, NodeProfile, NodeStatus, OrphanCleanup, StartedNode, StopReport};
use crate::notice::NoticeSink;
use crate::notifier::{NodeStatusEvent, StatusNotifier, StatusObserver, SubscriptionId};
use crate::platform;
use crate::process::{LaunchSpec, ProcessSupervisor};
use crate::registry::{InsertOutcome, NodeLocks, NodeRegistry, PortReservation, RunningInstance};
use crate::system::ProcessSampler;
use chrono::Utc;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Builder for [`Orchestrator`]. The notice sink is required.
pub struct OrchestratorBuilder {
    config: FleetConfig,
    sink: Arc<dyn NoticeSink>,
    generator: Option<Arc<dyn ConfigGenerator>>,
    core_info: Option<Arc<dyn CoreInfoProvider>>,
    probe: Option<Box<dyn ListenerProbe>>,
    supervisor: ProcessSupervisor,
}

impl OrchestratorBuilder {
    pub fn with_config_generator(mut self, generator: Arc<dyn ConfigGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_core_info(mut self, core_info: Arc<dyn CoreInfoProvider>) -> Self {
        self.core_info = Some(core_info);
        self
    }

    pub fn with_listener_probe(mut self, probe: Box<dyn ListenerProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_supervisor(mut self, supervisor: ProcessSupervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        self.config.validate()?;

        let core_info = self
            .core_info
            .unwrap_or_else(|| Arc::new(BuiltinCoreInfo::new(&self.config.bin_dir)));
        let generator = self
            .generator
            .unwrap_or_else(|| Arc::new(InboundConfigGenerator::new()));
        let probe = self
            .probe
            .unwrap_or_else(|| Box::new(SystemListenerProbe));
        let allocator =
            PortAllocator::new(self.config.auto_port_start(), self.config.max_port, probe);

        info!(
            "Orchestrator ready: auto ports {}..{}, configs in {}",
            self.config.auto_port_start(),
            self.config.max_port,
            self.config.bin_config_dir.display()
        );

        Ok(Orchestrator {
            config: self.config,
            registry: NodeRegistry::new(),
            locks: NodeLocks::new(),
            allocator,
            supervisor: self.supervisor,
            generator,
            core_info,
            notifier: StatusNotifier::new(),
            sink: self.sink,
            sampler: ProcessSampler::default(),
        })
    }
}

/// Runs several proxy cores side by side, one per node.
pub struct Orchestrator {
    config: FleetConfig,
    registry: NodeRegistry,
    locks: NodeLocks,
    allocator: PortAllocator<Box<dyn ListenerProbe>>,
    supervisor: ProcessSupervisor,
    generator: Arc<dyn ConfigGenerator>,
    core_info: Arc<dyn CoreInfoProvider>,
    notifier: StatusNotifier,
    sink: Arc<dyn NoticeSink>,
    sampler: ProcessSampler,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("nodes", &self.registry.len())
            .field("bin_config_dir", &self.config.bin_config_dir)
            .finish()
    }
}

impl Orchestrator {
    pub fn builder(config: FleetConfig, sink: Arc<dyn NoticeSink>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            sink,
            generator: None,
            core_info: None,
            probe: None,
            supervisor: ProcessSupervisor::new(),
        }
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn subscribe(&self, observer: Arc<dyn StatusObserver>) -> SubscriptionId {
        self.notifier.subscribe(observer)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }

    // ========================================
    // Start
    // ========================================

    /// Start a node. Failures are reported through the sink.
    pub async fn start_node(&self, profile: &NodeProfile) -> bool {
        self.start_node_detailed(profile).await.is_ok()
    }

    /// Start a node and return what was started, or why not.
    pub async fn start_node_detailed(&self, profile: &NodeProfile) -> Result<StartedNode> {
        match self.start_node_inner(profile).await {
            Ok(started) => {
                self.sink.notice(
                    false,
                    &format!(
                        "Started node: {} on port {}",
                        profile.summary(),
                        started.local_port
                    ),
                );
                Ok(started)
            }
            Err(e) => {
                warn!("[{}] Start failed: {}", profile.index_id, e);
                let notify = matches!(e, FleetError::ProcessStart { .. });
                self.sink.notice(notify, &e.to_string());
                Err(e)
            }
        }
    }

    async fn start_node_inner(&self, profile: &NodeProfile) -> Result<StartedNode> {
        let index_id = profile.index_id.as_str();
        validate_index_id(index_id)?;

        let _guard = self.locks.lock(index_id).await;

        if let Some(stale) = self.registry.remove_if_exited(index_id) {
            self.evict_crashed(&stale).await;
        }
        if self.registry.get(index_id).is_some() {
            return Err(FleetError::AlreadyRunning {
                index_id: index_id.to_string(),
                summary: profile.summary(),
            });
        }

        let span = self.config.inbound.port_span();
        let reservation = self.reserve_port(profile, span)?;
        let port = reservation.port();
        let config_path = self.config.node_config_path(index_id);
        let artifact = ConfigArtifact::new(index_id, &config_path);

        let generated = self
            .generator
            .generate_minimal_config(&self.config, profile, port, &config_path)
            .await;
        if !generated.success {
            return Err(FleetError::ConfigGeneration {
                index_id: index_id.to_string(),
                message: generated.message,
            });
        }

        let process = self.launch(profile, port, &config_path).await?;

        let instance = Arc::new(RunningInstance {
            process,
            local_port: port,
            port_span: span,
            profile: profile.clone(),
            core_type: profile.core_type,
            config_path,
            started_at: Utc::now(),
        });

        let rejection = match self.registry.insert_if_absent(Arc::clone(&instance)) {
            InsertOutcome::Inserted => None,
            InsertOutcome::AlreadyPresent => Some(FleetError::AlreadyRunning {
                index_id: index_id.to_string(),
                summary: profile.summary(),
            }),
            InsertOutcome::PortTaken { holder } => {
                debug!("[{}] Port {} taken by {}", index_id, port, holder);
                Some(FleetError::PortConflict { port })
            }
        };
        if let Some(e) = rejection {
            if let Err(stop_err) = self
                .supervisor
                .stop(&instance.process, self.config.stop_grace())
                .await
            {
                error!("[{}] Failed to stop rejected core: {}", index_id, stop_err);
            }
            return Err(e);
        }
        artifact.keep();
        drop(reservation);

        self.notifier.publish(NodeStatusEvent::started(index_id, port));

        Ok(StartedNode {
            index_id: index_id.to_string(),
            local_port: port,
            pid: instance.process.pid(),
            core_type: profile.core_type,
        })
    }

    /// Pick and reserve a port together with the `span - 1` offset ports
    /// after it. Auto-assigned ports are retried if a concurrent start of
    /// another node claimed one of them.
    fn reserve_port(&self, profile: &NodeProfile, span: u16) -> Result<PortReservation> {
        let index_id = profile.index_id.as_str();
        let explicit = profile.requested_port()?.is_some();
        let mut excluded = HashSet::new();

        loop {
            let mut held = self.registry.held_ports();
            held.extend(excluded.iter().copied());

            let port = self.allocator.allocate(profile, &held, span)?;
            if explicit {
                let taken = (0..span)
                    .filter_map(|offset| port.checked_add(offset))
                    .find(|p| held.contains(p));
                if let Some(taken) = taken {
                    return Err(FleetError::PortConflict { port: taken });
                }
            }
            match self.registry.reserve_ports(index_id, port, span) {
                Some(reservation) => return Ok(reservation),
                None if explicit => return Err(FleetError::PortConflict { port }),
                None => {
                    debug!("[{}] Port {} claimed concurrently, rescanning", index_id, port);
                    excluded.insert(port);
                }
            }
        }
    }

    async fn launch(
        &self,
        profile: &NodeProfile,
        port: u16,
        config_path: &Path,
    ) -> Result<crate::process::CoreProcess> {
        let info = self.core_info.core_info(profile.core_type)?;
        let executable = self.core_info.resolve_executable(&info)?;

        let spec = LaunchSpec::new(
            &profile.index_id,
            executable,
            &self.config.bin_config_dir,
            port,
        )
        .with_summary(profile.summary())
        .with_args(info.render_arguments(config_path))
        .with_envs(info.render_environment(config_path));

        self.supervisor.start(&spec, &self.config.readiness).await
    }

    // ========================================
    // Stop
    // ========================================

    /// Stop a node. Returns false if it was not registered or would not stop.
    pub async fn stop_node(&self, index_id: &str) -> bool {
        match self.stop_node_detailed(index_id).await {
            Ok(_) => true,
            Err(FleetError::NotRunning { .. }) => false,
            Err(e) => {
                error!("[{}] Stop failed: {}", index_id, e);
                self.sink.notice(true, &e.to_string());
                false
            }
        }
    }

    pub async fn stop_node_detailed(&self, index_id: &str) -> Result<StopReport> {
        let _guard = self.locks.lock(index_id).await;

        let instance = self
            .registry
            .get(index_id)
            .ok_or_else(|| FleetError::NotRunning {
                index_id: index_id.to_string(),
            })?;

        self.supervisor
            .stop(&instance.process, self.config.stop_grace())
            .await?;
        self.registry.remove(index_id);

        let cleanup_warning = self.remove_config(index_id, &instance.config_path).await;

        self.sink
            .notice(false, &format!("Stopped node: {}", instance.profile.summary()));
        self.notifier.publish(NodeStatusEvent::stopped(index_id));

        Ok(StopReport {
            index_id: index_id.to_string(),
            cleanup_warning,
        })
    }

    /// Stop every registered node. Returns how many were stopped.
    pub async fn stop_all_nodes(&self) -> usize {
        let mut ids: Vec<String> = self.registry.list_ids().into_iter().collect();
        ids.sort();

        let mut stopped = 0;
        for index_id in ids {
            if self.stop_node(&index_id).await {
                stopped += 1;
            }
        }
        if stopped > 0 {
            info!("Stopped {} nodes", stopped);
        }
        stopped
    }

    /// Start profiles in order. A failure never aborts the rest.
    pub async fn start_nodes(&self, profiles: &[NodeProfile]) -> BulkResult {
        let mut result = BulkResult::default();
        for profile in profiles {
            result.record(self.start_node(profile).await);
        }
        result
    }

    /// Stop ids in order. A failure never aborts the rest.
    pub async fn stop_nodes(&self, index_ids: &[String]) -> BulkResult {
        let mut result = BulkResult::default();
        for index_id in index_ids {
            result.record(self.stop_node(index_id).await);
        }
        result
    }

    // ========================================
    // Queries
    // ========================================

    pub fn is_node_running(&self, index_id: &str) -> bool {
        self.registry.is_running(index_id)
    }

    pub fn get_node_local_port(&self, index_id: &str) -> Option<u16> {
        self.registry.local_port(index_id)
    }

    /// Ids of nodes whose core is alive, sorted.
    pub fn running_node_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .registry
            .entries()
            .iter()
            .filter(|instance| instance.is_alive())
            .map(|instance| instance.index_id().to_string())
            .collect();
        ids.sort();
        ids
    }

    /// Snapshot of every registered node with sampled resource usage.
    pub fn node_statuses(&self) -> Vec<NodeStatus> {
        let mut entries = self.registry.entries();
        entries.sort_by(|a, b| a.index_id().cmp(b.index_id()));

        let pids: Vec<u32> = entries
            .iter()
            .map(|instance| instance.process.pid().unwrap_or(0))
            .collect();
        let usage = self.sampler.sample(&pids);

        entries
            .iter()
            .zip(usage)
            .map(|(instance, usage)| {
                let running = instance.is_alive();
                NodeStatus {
                    index_id: instance.index_id().to_string(),
                    summary: instance.profile.summary(),
                    core_type: instance.core_type,
                    local_port: instance.local_port,
                    pid: instance.process.pid(),
                    running,
                    uptime_secs: instance.process.uptime().as_secs(),
                    cpu: if running { usage.cpu } else { 0.0 },
                    ram_bytes: if running { usage.ram_bytes } else { 0 },
                }
            })
            .collect()
    }

    // ========================================
    // Maintenance
    // ========================================

    /// Evict nodes whose core exited on its own. Returns their ids.
    pub async fn reap_crashed(&self) -> Vec<String> {
        let mut reaped = Vec::new();
        for index_id in self.registry.exited_ids() {
            let _guard = self.locks.lock(&index_id).await;
            if let Some(instance) = self.registry.remove_if_exited(&index_id) {
                self.evict_crashed(&instance).await;
                reaped.push(index_id);
            }
        }
        reaped.sort();
        reaped
    }

    async fn evict_crashed(&self, instance: &RunningInstance) {
        let index_id = instance.index_id();
        let tail = instance.process.output_tail();
        warn!(
            "[{}] Core exited unexpectedly; last output: {}",
            index_id,
            tail.join(" | ")
        );

        self.remove_config(index_id, &instance.config_path).await;
        let crashed = FleetError::ProcessCrashed {
            index_id: index_id.to_string(),
        };
        self.sink.notice(true, &crashed.to_string());
        self.notifier.publish(NodeStatusEvent::stopped(index_id));
    }

    /// Remove leftovers of an earlier session: core processes still running
    /// from one of our per-node configs, and config files no node owns.
    pub async fn cleanup_orphans(&self) -> Result<OrphanCleanup> {
        let mut cleanup = OrphanCleanup::default();
        let config_dir = self.config.bin_config_dir.clone();

        let known_pids: HashSet<u32> = self
            .registry
            .entries()
            .iter()
            .filter_map(|instance| instance.process.pid())
            .collect();

        let candidates = tokio::task::spawn_blocking(|| {
            platform::find_processes_by_cmdline(PathsConfig::NODE_CONFIG_PREFIX)
        })
        .await
        .map_err(|e| FleetError::Other(format!("Process scan failed: {}", e)))?;

        for (pid, cmdline) in candidates {
            if known_pids.contains(&pid) {
                continue;
            }
            let cwd = platform::process_cwd(pid);
            let Some(index_id) = orphan_index_id(&cmdline, &config_dir, cwd.as_deref()) else {
                continue;
            };
            // A busy id is mid start or stop; its files and core are not leftovers.
            let Some(_guard) = self.locks.try_lock(&index_id) else {
                debug!("Node {} is busy, leaving core {} alone", index_id, pid);
                continue;
            };
            if self.registry.get(&index_id).is_some() {
                continue;
            }

            info!("Terminating orphaned core {} for node {}", pid, index_id);
            match platform::terminate_process(pid, self.config.stop_grace()).await {
                Ok(true) => cleanup.processes_stopped += 1,
                Ok(false) => warn!("Orphaned core {} did not exit", pid),
                Err(e) => warn!("Failed to terminate orphaned core {}: {}", pid, e),
            }
        }

        let mut dir = match tokio::fs::read_dir(&config_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(cleanup),
            Err(e) => return Err(FleetError::io_with_path(e, config_dir)),
        };
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| FleetError::io_with_path(e, &config_dir))?
        {
            let file_name = entry.file_name();
            let Some(index_id) = index_id_from_config_file_name(&file_name.to_string_lossy())
                .map(str::to_string)
            else {
                continue;
            };
            let Some(_guard) = self.locks.try_lock(&index_id) else {
                debug!("Node {} is busy, keeping its config", index_id);
                continue;
            };
            if self.registry.get(&index_id).is_some() {
                continue;
            }
            if self.remove_config(&index_id, &entry.path()).await.is_none() {
                cleanup.configs_removed += 1;
            }
        }

        if cleanup != OrphanCleanup::default() {
            info!(
                "Orphan cleanup: {} processes stopped, {} configs removed",
                cleanup.processes_stopped, cleanup.configs_removed
            );
        }
        Ok(cleanup)
    }

    /// Delete a per-node config. Returns a warning instead of failing.
    async fn remove_config(&self, index_id: &str, path: &Path) -> Option<String> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!("[{}] Removed {}", index_id, path.display());
                None
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                let warning = FleetError::FileCleanup {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                }
                .to_string();
                warn!("[{}] {}", index_id, warning);
                Some(warning)
            }
        }
    }
}

/// Removes a node's config file on drop unless the node was registered.
///
/// Covers every way out of a start, including the start future being dropped.
struct ConfigArtifact {
    index_id: String,
    path: PathBuf,
    keep: bool,
}

impl ConfigArtifact {
    fn new(index_id: &str, path: &Path) -> Self {
        Self {
            index_id: index_id.to_string(),
            path: path.to_path_buf(),
            keep: false,
        }
    }

    fn keep(mut self) {
        self.keep = true;
    }
}

impl Drop for ConfigArtifact {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("[{}] Removed {}", self.index_id, self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "[{}] Failed to remove {}: {}",
                self.index_id,
                self.path.display(),
                e
            ),
        }
    }
}

/// Index id of the per-node config a core command line points at, if that
/// config belongs to `config_dir`.
///
/// Cores run with the config directory as working directory, so a relative
/// reference counts when the process's `cwd` is that directory. Where the
/// working directory cannot be read, the file still being present in
/// `config_dir` has to do.
fn orphan_index_id(cmdline: &str, config_dir: &Path, cwd: Option<&Path>) -> Option<String> {
    cmdline.split_whitespace().find_map(|token| {
        let token = token.trim_matches('"');
        let path = PathBuf::from(token);
        let file_name = path.file_name()?.to_str()?;
        let index_id = index_id_from_config_file_name(file_name)?;

        let belongs = if path.is_absolute() {
            path.parent() == Some(config_dir)
        } else {
            match cwd {
                Some(cwd) => {
                    let resolved = cwd.join(&path);
                    same_dir(resolved.parent()?, config_dir)
                }
                None => config_dir.join(file_name).exists(),
            }
        };
        belongs.then(|| index_id.to_string())
    })
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notice::QueueNoticeSink;
    use tempfile::TempDir;

    #[test]
    fn test_orphan_index_id_absolute() {
        let dir = Path::new("/data/binConfigs");
        assert_eq!(
            orphan_index_id("/opt/bin/sing-box run -c /data/binConfigs/multicore_a.json", dir, None),
            Some("a".to_string())
        );
        assert_eq!(
            orphan_index_id("/opt/bin/sing-box run -c /elsewhere/multicore_a.json", dir, None),
            None
        );
        assert_eq!(orphan_index_id("/usr/bin/vim notes.txt", dir, None), None);
    }

    #[test]
    fn test_orphan_index_id_relative_without_cwd_requires_file() {
        let temp_dir = TempDir::new().unwrap();
        let cmdline = "/opt/bin/xray run -c multicore_b.json";
        assert_eq!(orphan_index_id(cmdline, temp_dir.path(), None), None);

        std::fs::write(temp_dir.path().join("multicore_b.json"), "{}").unwrap();
        assert_eq!(
            orphan_index_id(cmdline, temp_dir.path(), None),
            Some("b".to_string())
        );
    }

    #[test]
    fn test_orphan_index_id_relative_checks_cwd() {
        let ours = TempDir::new().unwrap();
        let theirs = TempDir::new().unwrap();
        std::fs::write(ours.path().join("multicore_b.json"), "{}").unwrap();
        let cmdline = "/opt/bin/xray run -c multicore_b.json";

        // Same file name, but another instance's directory.
        assert_eq!(orphan_index_id(cmdline, ours.path(), Some(theirs.path())), None);
        assert_eq!(
            orphan_index_id(cmdline, ours.path(), Some(ours.path())),
            Some("b".to_string())
        );
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = FleetConfig::with_root(temp_dir.path());
        config.inbound.local_port = 65500;
        let result = Orchestrator::builder(config, Arc::new(QueueNoticeSink::new(8))).build();
        assert!(matches!(result, Err(FleetError::Config { .. })));
    }

    #[tokio::test]
    async fn test_empty_index_id_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let sink = Arc::new(QueueNoticeSink::new(8));
        let orchestrator = Orchestrator::builder(FleetConfig::with_root(temp_dir.path()), sink.clone())
            .build()
            .unwrap();

        let profile = NodeProfile::new("", crate::models::CoreType::Xray);
        let err = orchestrator.start_node_detailed(&profile).await.unwrap_err();
        assert!(matches!(err, FleetError::Validation { .. }));
        assert_eq!(sink.drain().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_executable_cleans_config() {
        let temp_dir = TempDir::new().unwrap();
        let config = FleetConfig::with_root(temp_dir.path());
        let config_path = config.node_config_path("a");
        let sink = Arc::new(QueueNoticeSink::new(8));
        let orchestrator = Orchestrator::builder(config, sink.clone()).build().unwrap();

        let profile = NodeProfile::new("a", crate::models::CoreType::Xray);
        let err = orchestrator.start_node_detailed(&profile).await.unwrap_err();
        assert!(matches!(err, FleetError::ExecutableResolution { .. }));
        assert!(!config_path.exists());
        assert!(!orchestrator.is_node_running("a"));
        assert!(orchestrator.registry().held_ports().is_empty());
    }

    struct PartialWriter;

    #[async_trait::async_trait]
    impl ConfigGenerator for PartialWriter {
        async fn generate_minimal_config(
            &self,
            _config: &FleetConfig,
            _profile: &NodeProfile,
            _port: u16,
            output_path: &Path,
        ) -> crate::config_gen::GenerateResult {
            let _ = std::fs::create_dir_all(output_path.parent().unwrap());
            std::fs::write(output_path, "{\"inbounds\": [").unwrap();
            crate::config_gen::GenerateResult::failed("outbound missing")
        }
    }

    #[tokio::test]
    async fn test_failed_generation_removes_partial_config() {
        let temp_dir = TempDir::new().unwrap();
        let config = FleetConfig::with_root(temp_dir.path());
        let config_path = config.node_config_path("a");
        let orchestrator = Orchestrator::builder(config, Arc::new(QueueNoticeSink::new(8)))
            .with_config_generator(Arc::new(PartialWriter))
            .build()
            .unwrap();

        let profile = NodeProfile::new("a", crate::models::CoreType::Xray);
        let err = orchestrator.start_node_detailed(&profile).await.unwrap_err();
        assert!(matches!(err, FleetError::ConfigGeneration { .. }));
        assert!(!config_path.exists());
        assert!(orchestrator.registry().held_ports().is_empty());
    }

    #[tokio::test]
    async fn test_stop_unknown_node() {
        let temp_dir = TempDir::new().unwrap();
        let sink = Arc::new(QueueNoticeSink::new(8));
        let orchestrator = Orchestrator::builder(FleetConfig::with_root(temp_dir.path()), sink.clone())
            .build()
            .unwrap();

        assert!(!orchestrator.stop_node("ghost").await);
        assert!(matches!(
            orchestrator.stop_node_detailed("ghost").await,
            Err(FleetError::NotRunning { .. })
        ));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_removes_stale_configs() {
        let temp_dir = TempDir::new().unwrap();
        let config = FleetConfig::with_root(temp_dir.path());
        std::fs::create_dir_all(&config.bin_config_dir).unwrap();
        std::fs::write(config.node_config_path("old"), "{}").unwrap();
        std::fs::write(config.bin_config_dir.join("unrelated.json"), "{}").unwrap();

        let orchestrator = Orchestrator::builder(config.clone(), Arc::new(QueueNoticeSink::new(8)))
            .build()
            .unwrap();
        let cleanup = orchestrator.cleanup_orphans().await.unwrap();

        assert_eq!(cleanup.configs_removed, 1);
        assert!(!config.node_config_path("old").exists());
        assert!(config.bin_config_dir.join("unrelated.json").exists());
    }

    #[tokio::test]
    async fn test_cleanup_without_config_dir() {
        let temp_dir = TempDir::new().unwrap();
        let orchestrator = Orchestrator::builder(
            FleetConfig::with_root(temp_dir.path()),
            Arc::new(QueueNoticeSink::new(8)),
        )
        .build()
        .unwrap();
        assert_eq!(
            orchestrator.cleanup_orphans().await.unwrap(),
            OrphanCleanup::default()
        );
    }
}
