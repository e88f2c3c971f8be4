//! Centralized configuration for corefleet.
//!
//! Compile-time defaults live on associated-const structs; the runtime
//! [`FleetConfig`] is a JSON document loaded by the composition root.

use crate::error::{FleetError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Orchestrator defaults.
pub struct FleetDefaults;

impl FleetDefaults {
    pub const APP_NAME: &'static str = "corefleet";
    /// Primary instance's socks port when no configuration says otherwise.
    pub const BASE_PORT: u16 = 10808;
    /// Distance between the primary port and the first auto-assigned node port.
    pub const AUTO_PORT_OFFSET: u32 = 100;
    /// Exclusive upper bound of the auto-assignment scan.
    pub const MAX_PORT: u32 = 65536;
    pub const STARTUP_GRACE: Duration = Duration::from_millis(500);
    pub const STOP_GRACE: Duration = Duration::from_secs(2);
    pub const KILL_WAIT: Duration = Duration::from_secs(1);
    pub const TCP_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
    pub const TCP_PROBE_INTERVAL: Duration = Duration::from_millis(200);
    /// Lines of core output kept for failure diagnostics.
    pub const OUTPUT_TAIL_LINES: usize = 40;
    pub const NOTICE_QUEUE_CAPACITY: usize = 256;
}

/// Shared directory and file naming.
pub struct PathsConfig;

impl PathsConfig {
    pub const BIN_DIR_NAME: &'static str = "bin";
    pub const BIN_CONFIG_DIR_NAME: &'static str = "binConfigs";
    pub const NODE_CONFIG_PREFIX: &'static str = "multicore_";
    pub const NODE_CONFIG_SUFFIX: &'static str = ".json";
    pub const CONFIG_FILE_NAME: &'static str = "corefleet.json";
}

/// Per-node config artifact name.
///
/// Both the generator (writer) and stop/cleanup (deleter) go through this.
pub fn node_config_file_name(index_id: &str) -> String {
    format!(
        "{}{}{}",
        PathsConfig::NODE_CONFIG_PREFIX,
        index_id,
        PathsConfig::NODE_CONFIG_SUFFIX
    )
}

/// Reject ids that cannot be embedded in a per-node file name.
///
/// The id ends up in a path and in core command lines, so separators, `..`,
/// whitespace and control characters are refused.
pub fn validate_index_id(index_id: &str) -> Result<()> {
    let problem = if index_id.trim().is_empty() {
        "Node has no index id; check the server settings".to_string()
    } else if index_id.contains(['/', '\\']) || index_id.contains("..") {
        format!("Index id {:?} must not contain path separators or '..'", index_id)
    } else if index_id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        format!("Index id {:?} must not contain whitespace", index_id)
    } else {
        return Ok(());
    };
    Err(FleetError::Validation {
        field: "index_id".to_string(),
        message: problem,
    })
}

/// Inverse of [`node_config_file_name`].
pub fn index_id_from_config_file_name(file_name: &str) -> Option<&str> {
    file_name
        .strip_prefix(PathsConfig::NODE_CONFIG_PREFIX)?
        .strip_suffix(PathsConfig::NODE_CONFIG_SUFFIX)
        .filter(|id| !id.is_empty())
}

/// How a freshly spawned core is judged alive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReadinessProbe {
    /// Wait a fixed interval, then fail if the process has already exited.
    Grace { delay_ms: u64 },
    /// Poll a TCP connect to the node's local port until it answers.
    Tcp { timeout_ms: u64, interval_ms: u64 },
}

impl Default for ReadinessProbe {
    fn default() -> Self {
        ReadinessProbe::Grace {
            delay_ms: FleetDefaults::STARTUP_GRACE.as_millis() as u64,
        }
    }
}

impl ReadinessProbe {
    pub fn tcp() -> Self {
        ReadinessProbe::Tcp {
            timeout_ms: FleetDefaults::TCP_PROBE_TIMEOUT.as_millis() as u64,
            interval_ms: FleetDefaults::TCP_PROBE_INTERVAL.as_millis() as u64,
        }
    }
}

/// Primary inbound definition the per-node inbounds are derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InboundSettings {
    /// The primary instance's socks port; also the allocator's base port.
    pub local_port: u16,
    pub udp_enabled: bool,
    pub sniffing_enabled: bool,
    pub dest_override: Vec<String>,
    pub route_only: bool,
    pub allow_lan_conn: bool,
    pub new_port_for_lan: bool,
    pub second_local_port_enabled: bool,
    pub user: Option<String>,
    pub pass: Option<String>,
}

impl Default for InboundSettings {
    fn default() -> Self {
        Self {
            local_port: FleetDefaults::BASE_PORT,
            udp_enabled: true,
            sniffing_enabled: true,
            dest_override: vec!["http".to_string(), "tls".to_string()],
            route_only: false,
            allow_lan_conn: false,
            new_port_for_lan: false,
            second_local_port_enabled: false,
            user: None,
            pass: None,
        }
    }
}

impl InboundSettings {
    /// Credentials, only when both halves are present and non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.user.as_deref(), self.pass.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        }
    }

    /// Consecutive ports a node binds, starting at its primary port.
    ///
    /// The second local inbound sits at `+1`, the separate LAN inbound at `+2`.
    pub fn port_span(&self) -> u16 {
        if self.allow_lan_conn && self.new_port_for_lan {
            3
        } else if self.second_local_port_enabled {
            2
        } else {
            1
        }
    }
}

/// Runtime configuration for the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Directory holding the core executables.
    pub bin_dir: PathBuf,
    /// Directory the per-node configs are written to; cores run from here.
    pub bin_config_dir: PathBuf,
    /// Exclusive upper bound for auto-assigned ports.
    pub max_port: u32,
    pub readiness: ReadinessProbe,
    /// Time a core gets to exit after the graceful stop request.
    pub stop_grace_ms: u64,
    /// Log level written into generated core configs.
    pub core_log_level: String,
    pub inbound: InboundSettings,
}

impl Default for FleetConfig {
    fn default() -> Self {
        let root = dirs::data_dir()
            .map(|dir| dir.join(FleetDefaults::APP_NAME))
            .unwrap_or_else(|| PathBuf::from("."));
        Self::with_root(root)
    }
}

impl FleetConfig {
    /// Defaults with `bin/` and `binConfigs/` under `root`.
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            bin_dir: root.join(PathsConfig::BIN_DIR_NAME),
            bin_config_dir: root.join(PathsConfig::BIN_CONFIG_DIR_NAME),
            max_port: FleetDefaults::MAX_PORT,
            readiness: ReadinessProbe::default(),
            stop_grace_ms: FleetDefaults::STOP_GRACE.as_millis() as u64,
            core_log_level: "warning".to_string(),
            inbound: InboundSettings::default(),
        }
    }

    /// Load from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|e| FleetError::io_with_path(e, path))?;
        let config: FleetConfig = serde_json::from_str(&raw).map_err(|e| FleetError::Config {
            message: format!("Invalid config {}: {}", path.display(), e),
        })?;
        config.validate()?;

        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Reject settings the allocator cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.inbound.local_port == 0 {
            return Err(FleetError::Config {
                message: "inbound.local_port must be positive".to_string(),
            });
        }
        if self.max_port > FleetDefaults::MAX_PORT {
            return Err(FleetError::Config {
                message: format!("max_port must not exceed {}", FleetDefaults::MAX_PORT),
            });
        }
        if self.auto_port_start() >= self.max_port {
            return Err(FleetError::Config {
                message: format!(
                    "no room for auto-assigned ports: scan would start at {} but max_port is {}",
                    self.auto_port_start(),
                    self.max_port
                ),
            });
        }
        Ok(())
    }

    /// Primary instance's own proxy port.
    pub fn base_port(&self) -> u16 {
        self.inbound.local_port
    }

    /// First port the allocator considers.
    pub fn auto_port_start(&self) -> u32 {
        u32::from(self.base_port()) + FleetDefaults::AUTO_PORT_OFFSET
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    /// Absolute path of a node's config artifact.
    pub fn node_config_path(&self, index_id: &str) -> PathBuf {
        self.bin_config_dir.join(node_config_file_name(index_id))
    }
}
