//! Platform-specific process management.
//!
//! Provides liveness checks and termination for processes we only know by PID
//! (leftovers from an earlier session). Cores we spawned ourselves are stopped
//! through their [`tokio::process::Child`] in the supervisor, which only borrows
//! [`request_graceful_stop`] from here.

use crate::error::{FleetError, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// Check if a process with the given PID is alive.
///
/// # Platform Behavior
/// - **Linux/macOS**: `kill(pid, 0)`; `EPERM` still means the process exists
/// - **Other**: looks the PID up in the `sysinfo` process table
pub fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        match kill(Pid::from_raw(raw), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    #[cfg(not(unix))]
    {
        use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

        let mut system = System::new();
        let sysinfo_pid = Pid::from_u32(pid);
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sysinfo_pid]),
            true,
            ProcessRefreshKind::new(),
        );
        system.process(sysinfo_pid).is_some()
    }
}

/// Ask a process to shut down.
///
/// # Platform Behavior
/// - **Linux/macOS**: sends SIGTERM
/// - **Windows**: there is no graceful equivalent for console cores; returns
///   `Ok(false)` so callers go straight to a forced kill
///
/// Returns `Ok(true)` if the request was delivered or the process is already gone.
pub fn request_graceful_stop(pid: u32) -> Result<bool> {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let raw = i32::try_from(pid)
            .map_err(|_| FleetError::Other(format!("PID {} out of range", pid)))?;

        debug!("Sending SIGTERM to process {}", pid);
        match kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => Ok(true),
            Err(e) => Err(FleetError::Other(format!(
                "Failed to send SIGTERM to {}: {}",
                pid, e
            ))),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        Ok(false)
    }
}

/// Terminate a process we did not spawn: graceful request, bounded wait, then force.
///
/// # Platform Behavior
/// - **Linux/macOS**: SIGTERM, poll for `timeout`, then SIGKILL
/// - **Windows**: `taskkill /PID {pid} /F /T`
///
/// Returns `true` if the process is gone afterwards.
pub async fn terminate_process(pid: u32, timeout: Duration) -> Result<bool> {
    if !is_process_alive(pid) {
        debug!("Process {} is not running", pid);
        return Ok(true);
    }

    #[cfg(unix)]
    {
        terminate_process_unix(pid, timeout).await
    }

    #[cfg(windows)]
    {
        let _ = timeout;
        terminate_process_windows(pid)
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = timeout;
        Err(FleetError::Other(
            "Process termination not implemented for this platform".into(),
        ))
    }
}

#[cfg(unix)]
async fn terminate_process_unix(pid: u32, timeout: Duration) -> Result<bool> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Err(e) = request_graceful_stop(pid) {
        warn!("{}", e);
    }

    let wait_interval = Duration::from_millis(100);
    let iterations = (timeout.as_millis() / wait_interval.as_millis()).max(1);

    for _ in 0..iterations {
        tokio::time::sleep(wait_interval).await;
        if !is_process_alive(pid) {
            debug!("Process {} terminated gracefully", pid);
            return Ok(true);
        }
    }

    debug!("Process {} still running, sending SIGKILL", pid);
    let raw = i32::try_from(pid).map_err(|_| FleetError::Other(format!("PID {} out of range", pid)))?;
    match kill(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => {
            return Err(FleetError::Other(format!(
                "Failed to kill process {}: {}",
                pid, e
            )))
        }
    }

    tokio::time::sleep(wait_interval).await;
    Ok(!is_process_alive(pid))
}

#[cfg(windows)]
fn terminate_process_windows(pid: u32) -> Result<bool> {
    use std::process::Command;

    debug!("Terminating process {} with taskkill", pid);

    let output = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/F", "/T"])
        .output()
        .map_err(|e| FleetError::Other(format!("Failed to run taskkill: {}", e)))?;

    if output.status.success() {
        Ok(true)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("not found") || stderr.contains("not running") {
            Ok(true)
        } else {
            warn!("taskkill failed for {}: {}", pid, stderr);
            Ok(false)
        }
    }
}

/// Scan for processes whose command line contains `pattern` (case-insensitive).
///
/// # Platform Behavior
/// - **Linux/macOS**: `ps -eo pid=,args=`
/// - **Windows**: `wmic process get processid,commandline`
///
/// Returns a list of (pid, cmdline) tuples; an unavailable tool yields an empty list.
pub fn find_processes_by_cmdline(pattern: &str) -> Vec<(u32, String)> {
    #[cfg(unix)]
    {
        find_processes_unix(pattern)
    }

    #[cfg(windows)]
    {
        find_processes_windows(pattern)
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = pattern;
        vec![]
    }
}

/// Working directory of a running process, where the platform exposes it.
///
/// # Platform Behavior
/// - **Linux**: resolves the `/proc/{pid}/cwd` link
/// - **Other**: returns `None`
pub fn process_cwd(pid: u32) -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        match std::fs::read_link(format!("/proc/{}/cwd", pid)) {
            Ok(cwd) => Some(cwd),
            Err(e) => {
                debug!("Cannot read working directory of {}: {}", pid, e);
                None
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = pid;
        None
    }
}

#[cfg(unix)]
fn find_processes_unix(pattern: &str) -> Vec<(u32, String)> {
    use std::process::Command;

    let output = match Command::new("ps").args(["-eo", "pid=,args="]).output() {
        Ok(o) => o,
        Err(e) => {
            debug!("Failed to run ps: {}", e);
            return vec![];
        }
    };

    if !output.status.success() {
        return vec![];
    }

    parse_ps_output(&String::from_utf8_lossy(&output.stdout), pattern)
}

#[cfg_attr(not(unix), allow(dead_code))]
fn parse_ps_output(stdout: &str, pattern: &str) -> Vec<(u32, String)> {
    let pattern_lower = pattern.to_lowercase();
    let own_pid = std::process::id();

    stdout
        .lines()
        .filter_map(|line| {
            let (pid, cmdline) = line.trim().split_once(char::is_whitespace)?;
            let pid: u32 = pid.trim().parse().ok()?;
            let cmdline = cmdline.trim();

            if pid != own_pid && cmdline.to_lowercase().contains(&pattern_lower) {
                Some((pid, cmdline.to_string()))
            } else {
                None
            }
        })
        .collect()
}

#[cfg(windows)]
fn find_processes_windows(pattern: &str) -> Vec<(u32, String)> {
    use std::process::Command;

    let output = match Command::new("wmic")
        .args(["process", "get", "processid,commandline", "/format:csv"])
        .output()
    {
        Ok(o) => o,
        Err(e) => {
            debug!("Failed to run wmic: {}", e);
            return vec![];
        }
    };

    if !output.status.success() {
        return vec![];
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let pattern_lower = pattern.to_lowercase();

    stdout
        .lines()
        .skip(1) // header
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }

            // CSV format: Node,CommandLine,ProcessId
            let parts: Vec<&str> = line.split(',').collect();
            if parts.len() < 3 {
                return None;
            }

            let cmdline = parts[1];
            let pid: u32 = parts[parts.len() - 1].trim().parse().ok()?;

            if cmdline.to_lowercase().contains(&pattern_lower) {
                Some((pid, cmdline.to_string()))
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_process_alive_self() {
        assert!(is_process_alive(std::process::id()));
    }

    #[test]
    fn test_is_process_alive_nonexistent() {
        assert!(!is_process_alive(4_000_000_000));
    }

    #[tokio::test]
    async fn test_terminate_nonexistent() {
        let result = terminate_process(4_000_000_000, Duration::from_millis(100)).await;
        assert!(result.unwrap());
    }

    #[test]
    fn test_parse_ps_output() {
        let stdout = "  101 /opt/bin/xray run -c multicore_a.json\n  202 /usr/bin/bash\nbogus\n";
        let found = parse_ps_output(stdout, "MULTICORE_");
        assert_eq!(
            found,
            vec![(101, "/opt/bin/xray run -c multicore_a.json".to_string())]
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_process_cwd_of_child() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .current_dir(dir.path())
            .spawn()
            .unwrap();

        let cwd = process_cwd(child.id());
        child.kill().unwrap();
        child.wait().unwrap();

        assert_eq!(cwd, Some(dir.path().canonicalize().unwrap()));
        assert_eq!(process_cwd(4_000_000_000), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_spawned_sleep() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();

        // Reap concurrently so the zombie does not keep kill(pid, 0) succeeding.
        let reaper = std::thread::spawn(move || child.wait());

        let stopped = terminate_process(pid, Duration::from_millis(500)).await.unwrap();
        assert!(stopped);
        assert!(reaper.join().unwrap().is_ok());
    }
}
