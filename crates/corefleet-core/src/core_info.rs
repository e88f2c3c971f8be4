//! Per-core launch metadata: executable names, argument and environment
//! templates, and how the config path is substituted into them.

use crate::error::{FleetError, Result};
use crate::models::CoreType;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The only substitution placeholder recognized in argument and environment templates.
pub const CONFIG_PLACEHOLDER: &str = "{config}";

/// Launch description of one core type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreInfo {
    pub core_type: CoreType,
    /// Candidate executable names, without platform suffix, in search order.
    pub exe_names: Vec<String>,
    /// Argument template; each entry is one argv token.
    pub arguments: Vec<String>,
    /// Environment template.
    pub environment: HashMap<String, String>,
    /// Substitute the config's absolute path instead of its bare file name.
    pub absolute_path: bool,
}

impl CoreInfo {
    pub fn new(core_type: CoreType, exe_names: &[&str], arguments: &[&str]) -> Self {
        Self {
            core_type,
            exe_names: exe_names.iter().map(|s| s.to_string()).collect(),
            arguments: arguments.iter().map(|s| s.to_string()).collect(),
            environment: HashMap::new(),
            absolute_path: false,
        }
    }

    pub fn with_absolute_path(mut self) -> Self {
        self.absolute_path = true;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// What `{config}` expands to for `config_path`.
    ///
    /// Arguments are passed as separate argv tokens, never through a shell,
    /// so the absolute form needs no quoting.
    pub fn config_argument(&self, config_path: &Path) -> String {
        if self.absolute_path {
            config_path.display().to_string()
        } else {
            config_path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| config_path.display().to_string())
        }
    }

    pub fn render_arguments(&self, config_path: &Path) -> Vec<String> {
        let value = self.config_argument(config_path);
        self.arguments
            .iter()
            .map(|arg| arg.replace(CONFIG_PLACEHOLDER, &value))
            .collect()
    }

    pub fn render_environment(&self, config_path: &Path) -> HashMap<String, String> {
        let value = self.config_argument(config_path);
        self.environment
            .iter()
            .map(|(key, template)| (key.clone(), template.replace(CONFIG_PLACEHOLDER, &value)))
            .collect()
    }
}

/// Supplies launch metadata and locates executables.
pub trait CoreInfoProvider: Send + Sync {
    fn core_info(&self, core_type: CoreType) -> Result<CoreInfo>;

    fn resolve_executable(&self, info: &CoreInfo) -> Result<PathBuf>;
}

/// Built-in table of supported cores, executables searched under `bin_dir`.
#[derive(Debug, Clone)]
pub struct BuiltinCoreInfo {
    bin_dir: PathBuf,
}

impl BuiltinCoreInfo {
    pub fn new(bin_dir: impl AsRef<Path>) -> Self {
        Self {
            bin_dir: bin_dir.as_ref().to_path_buf(),
        }
    }

    /// Paths tried for `exe_name`: `bin/<name>` then `bin/<core>/<name>`.
    fn candidates(&self, core_type: CoreType, exe_name: &str) -> [PathBuf; 2] {
        let file_name = format!("{}{}", exe_name, std::env::consts::EXE_SUFFIX);
        [
            self.bin_dir.join(&file_name),
            self.bin_dir.join(core_type.as_str()).join(&file_name),
        ]
    }
}

impl CoreInfoProvider for BuiltinCoreInfo {
    fn core_info(&self, core_type: CoreType) -> Result<CoreInfo> {
        let info = match core_type {
            CoreType::Xray => CoreInfo::new(core_type, &["xray"], &["run", "-c", CONFIG_PLACEHOLDER]),
            CoreType::V2fly => {
                CoreInfo::new(core_type, &["v2ray", "wv2ray"], &["run", "-c", CONFIG_PLACEHOLDER])
            }
            CoreType::SingBox => CoreInfo::new(
                core_type,
                &["sing-box-client", "sing-box"],
                &["run", "-c", CONFIG_PLACEHOLDER, "--disable-color"],
            )
            .with_absolute_path()
            .with_env("ENABLE_DEPRECATED_SPECIAL_OUTBOUNDS", "true"),
            CoreType::Mihomo => CoreInfo::new(
                core_type,
                &["mihomo", "mihomo-linux-amd64", "mihomo-windows-amd64", "clash"],
                &["-f", CONFIG_PLACEHOLDER],
            )
            .with_absolute_path(),
            CoreType::Hysteria2 => {
                CoreInfo::new(core_type, &["hysteria", "hysteria2"], &["-c", CONFIG_PLACEHOLDER])
                    .with_absolute_path()
            }
            CoreType::Tuic => {
                CoreInfo::new(core_type, &["tuic-client", "tuic"], &["-c", CONFIG_PLACEHOLDER])
                    .with_absolute_path()
            }
            CoreType::Naiveproxy => {
                CoreInfo::new(core_type, &["naive", "naiveproxy"], &[CONFIG_PLACEHOLDER])
                    .with_absolute_path()
            }
            CoreType::Juicity => CoreInfo::new(
                core_type,
                &["juicity-client", "juicity"],
                &["run", "-c", CONFIG_PLACEHOLDER],
            )
            .with_absolute_path(),
        };
        Ok(info)
    }

    fn resolve_executable(&self, info: &CoreInfo) -> Result<PathBuf> {
        let mut searched = Vec::new();
        for exe_name in &info.exe_names {
            for candidate in self.candidates(info.core_type, exe_name) {
                if candidate.is_file() {
                    return Ok(candidate);
                }
                searched.push(candidate.display().to_string());
            }
        }

        Err(FleetError::ExecutableResolution {
            core: info.core_type.to_string(),
            message: format!("searched {}", searched.join(", ")),
        })
    }
}
