//! Launch parameters for a core process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Everything needed to spawn one core.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Node the process belongs to.
    pub index_id: String,
    /// Human-readable node description used in failure messages.
    pub summary: String,
    /// Resolved path to the core executable.
    pub executable: PathBuf,
    /// Arguments with the config placeholder already substituted.
    pub args: Vec<String>,
    /// Working directory (the bin-config directory).
    pub working_dir: PathBuf,
    /// Extra environment, placeholder already substituted.
    pub env: HashMap<String, String>,
    /// Local port the core is expected to listen on.
    pub port: u16,
}

impl LaunchSpec {
    pub fn new(
        index_id: impl Into<String>,
        executable: impl AsRef<Path>,
        working_dir: impl AsRef<Path>,
        port: u16,
    ) -> Self {
        let index_id = index_id.into();
        Self {
            summary: index_id.clone(),
            index_id,
            executable: executable.as_ref().to_path_buf(),
            args: Vec::new(),
            working_dir: working_dir.as_ref().to_path_buf(),
            env: HashMap::new(),
            port,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_envs(mut self, env: HashMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }
}
