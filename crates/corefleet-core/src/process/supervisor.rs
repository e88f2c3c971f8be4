//! Spawning, readiness checking and termination of core processes.

use super::launch::LaunchSpec;
use super::output::{drain_lines, OutputTail};
use crate::config::{FleetDefaults, ReadinessProbe};
use crate::error::{FleetError, Result};
use crate::platform;
use std::process::{ExitStatus, Stdio};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A running (or recently exited) core we spawned.
#[derive(Debug)]
pub struct CoreProcess {
    index_id: String,
    pid: Option<u32>,
    child: Mutex<Child>,
    output: OutputTail,
    started_at: Instant,
}

impl CoreProcess {
    pub fn index_id(&self) -> &str {
        &self.index_id
    }

    /// OS process id captured at spawn time.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Non-blocking exit check. Reaps the process if it has exited.
    pub fn has_exited(&self) -> bool {
        self.exit_status().is_some()
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        match child.try_wait() {
            Ok(status) => status,
            Err(e) => {
                warn!("[{}] Failed to check core status: {}", self.index_id, e);
                None
            }
        }
    }

    /// Recent output lines for diagnostics.
    pub fn output_tail(&self) -> Vec<String> {
        self.output.snapshot()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn force_kill(&self) {
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = child.start_kill() {
            debug!("[{}] Kill request failed: {}", self.index_id, e);
        }
    }

    /// Poll until the process exits or `timeout` elapses.
    async fn wait_exit(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.has_exited() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }

    fn failure_detail(&self, headline: &str) -> String {
        let mut message = match self.exit_status() {
            Some(status) => format!("{} ({})", headline, status),
            None => headline.to_string(),
        };
        let tail = self.output.render();
        if !tail.is_empty() {
            message.push('\n');
            message.push_str(&tail);
        }
        message
    }
}

/// Starts and stops core processes.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    output_tail_lines: usize,
    kill_wait: Duration,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self {
            output_tail_lines: FleetDefaults::OUTPUT_TAIL_LINES,
            kill_wait: FleetDefaults::KILL_WAIT,
        }
    }
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the core and wait for the readiness probe to pass.
    ///
    /// A process that exits during readiness, or never opens its port under
    /// the TCP probe, is reported as [`FleetError::ProcessStart`].
    pub async fn start(&self, spec: &LaunchSpec, readiness: &ReadinessProbe) -> Result<CoreProcess> {
        let mut command = Command::new(&spec.executable);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group so terminal signals aimed at us do not hit the core.
        #[cfg(unix)]
        command.process_group(0);

        debug!(
            "[{}] Spawning {} {:?}",
            spec.index_id,
            spec.executable.display(),
            spec.args
        );

        let mut child = command.spawn().map_err(|e| FleetError::ProcessStart {
            summary: spec.summary.clone(),
            message: format!("Failed to spawn {}: {}", spec.executable.display(), e),
        })?;

        let output = OutputTail::new(self.output_tail_lines);
        if let Some(stdout) = child.stdout.take() {
            drain_lines(spec.index_id.clone(), "stdout", stdout, output.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            drain_lines(spec.index_id.clone(), "stderr", stderr, output.clone());
        }

        let process = CoreProcess {
            index_id: spec.index_id.clone(),
            pid: child.id(),
            child: Mutex::new(child),
            output,
            started_at: Instant::now(),
        };

        if let Err(message) = self.await_ready(&process, spec.port, readiness).await {
            if !process.has_exited() {
                process.force_kill();
                process.wait_exit(self.kill_wait).await;
            }
            error!("[{}] Core failed readiness: {}", spec.index_id, message);
            return Err(FleetError::ProcessStart {
                summary: spec.summary.clone(),
                message,
            });
        }

        info!(
            "[{}] Core started with PID {:?} on port {}",
            spec.index_id, process.pid, spec.port
        );
        Ok(process)
    }

    async fn await_ready(
        &self,
        process: &CoreProcess,
        port: u16,
        readiness: &ReadinessProbe,
    ) -> std::result::Result<(), String> {
        match readiness {
            ReadinessProbe::Grace { delay_ms } => {
                tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
                if process.has_exited() {
                    // Let the drain tasks flush the final lines.
                    tokio::time::sleep(EXIT_POLL_INTERVAL).await;
                    return Err(process.failure_detail("Core exited immediately"));
                }
                Ok(())
            }
            ReadinessProbe::Tcp {
                timeout_ms,
                interval_ms,
            } => {
                let deadline = Instant::now() + Duration::from_millis(*timeout_ms);
                let interval = Duration::from_millis((*interval_ms).max(1));
                loop {
                    if process.has_exited() {
                        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
                        return Err(process.failure_detail("Core exited before opening its port"));
                    }
                    let attempt = tokio::time::timeout(
                        interval,
                        tokio::net::TcpStream::connect(("127.0.0.1", port)),
                    )
                    .await;
                    if let Ok(Ok(_)) = attempt {
                        debug!("[{}] Port {} is accepting connections", process.index_id, port);
                        return Ok(());
                    }
                    if Instant::now() >= deadline {
                        return Err(process.failure_detail(&format!(
                            "Core did not open port {} within {}ms",
                            port, timeout_ms
                        )));
                    }
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }

    /// Stop a core: graceful request, wait up to `grace`, then force-kill.
    pub async fn stop(&self, process: &CoreProcess, grace: Duration) -> Result<()> {
        if process.has_exited() {
            debug!("[{}] Core already exited", process.index_id);
            return Ok(());
        }

        let requested = match process.pid {
            Some(pid) => platform::request_graceful_stop(pid).unwrap_or_else(|e| {
                warn!("[{}] {}", process.index_id, e);
                false
            }),
            None => false,
        };

        if requested && process.wait_exit(grace).await {
            info!("[{}] Core stopped gracefully", process.index_id);
            return Ok(());
        }

        debug!("[{}] Core still running, killing", process.index_id);
        process.force_kill();
        if process.wait_exit(self.kill_wait).await {
            info!("[{}] Core killed", process.index_id);
            Ok(())
        } else {
            Err(FleetError::Other(format!(
                "Core for node {} did not exit after kill",
                process.index_id
            )))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    /// A core that runs `script` under `/bin/sh -c`.
    fn shell_spec(dir: &Path, script: &str, port: u16) -> LaunchSpec {
        LaunchSpec::new("a", "/bin/sh", dir, port)
            .with_arg("-c")
            .with_arg(script)
            .with_arg("core")
    }

    fn grace(ms: u64) -> ReadinessProbe {
        ReadinessProbe::Grace { delay_ms: ms }
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let temp_dir = TempDir::new().unwrap();
        let spec = shell_spec(temp_dir.path(), "exec sleep 30", 1180);

        let supervisor = ProcessSupervisor::new();
        let process = supervisor.start(&spec, &grace(100)).await.unwrap();
        assert!(process.pid().is_some());
        assert!(!process.has_exited());

        supervisor
            .stop(&process, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(process.has_exited());
    }

    #[tokio::test]
    async fn test_immediate_exit_reports_output() {
        let temp_dir = TempDir::new().unwrap();
        let spec = shell_spec(temp_dir.path(), "echo 'bad config' >&2; exit 1", 1180)
            .with_summary("[xray] A");

        let err = ProcessSupervisor::new()
            .start(&spec, &grace(300))
            .await
            .unwrap_err();
        match err {
            FleetError::ProcessStart { summary, message } => {
                assert_eq!(summary, "[xray] A");
                assert!(message.contains("Core exited immediately"));
                assert!(message.contains("bad config"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let temp_dir = TempDir::new().unwrap();
        let spec = LaunchSpec::new("a", temp_dir.path().join("absent"), temp_dir.path(), 1180);
        let err = ProcessSupervisor::new()
            .start(&spec, &grace(10))
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::ProcessStart { .. }));
    }

    #[tokio::test]
    async fn test_ignored_sigterm_is_killed() {
        let temp_dir = TempDir::new().unwrap();
        let spec = shell_spec(
            temp_dir.path(),
            "trap '' TERM; while true; do sleep 1; done",
            1180,
        );

        let supervisor = ProcessSupervisor::new();
        let process = supervisor.start(&spec, &grace(100)).await.unwrap();
        supervisor
            .stop(&process, Duration::from_millis(200))
            .await
            .unwrap();
        assert!(process.has_exited());
    }

    #[tokio::test]
    async fn test_tcp_probe_times_out() {
        let temp_dir = TempDir::new().unwrap();
        // Bind then drop to get a port nobody listens on.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let spec = shell_spec(temp_dir.path(), "exec sleep 30", port);
        let probe = ReadinessProbe::Tcp {
            timeout_ms: 300,
            interval_ms: 50,
        };

        let err = ProcessSupervisor::new().start(&spec, &probe).await.unwrap_err();
        assert!(err.to_string().contains("did not open port"));
    }

    #[tokio::test]
    async fn test_tcp_probe_succeeds_when_port_opens() {
        let temp_dir = TempDir::new().unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let spec = shell_spec(temp_dir.path(), "exec sleep 30", port);
        let probe = ReadinessProbe::Tcp {
            timeout_ms: 2000,
            interval_ms: 50,
        };

        let supervisor = ProcessSupervisor::new();
        let process = supervisor.start(&spec, &probe).await.unwrap();
        supervisor.stop(&process, Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_env_and_args_reach_core() {
        let temp_dir = TempDir::new().unwrap();
        let spec = shell_spec(
            temp_dir.path(),
            "echo \"$1 $NODE_MARK\" > marker.txt; exec sleep 30",
            1180,
        )
        .with_arg("multicore_a.json")
        .with_env("NODE_MARK", "set");

        let supervisor = ProcessSupervisor::new();
        let process = supervisor.start(&spec, &grace(200)).await.unwrap();
        let marker = std::fs::read_to_string(temp_dir.path().join("marker.txt")).unwrap();
        assert_eq!(marker.trim(), "multicore_a.json set");
        supervisor.stop(&process, Duration::from_secs(1)).await.unwrap();
    }
}
