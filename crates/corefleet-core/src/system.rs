//! Per-core CPU and memory sampling.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Resource usage of one core process.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProcessUsage {
    /// CPU usage percentage (0-100+, can exceed 100 on multi-core).
    pub cpu: f32,
    pub ram_bytes: u64,
}

struct SamplerState {
    system: System,
    last_refresh: Option<Instant>,
}

/// Samples process usage, refreshing the process table at most once per TTL.
///
/// CPU figures are deltas between refreshes, so the first sample after
/// startup reads 0.
pub struct ProcessSampler {
    cache_ttl: Duration,
    state: Mutex<SamplerState>,
}

impl std::fmt::Debug for ProcessSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSampler")
            .field("cache_ttl", &self.cache_ttl)
            .finish()
    }
}

impl ProcessSampler {
    pub fn new(cache_ttl: Duration) -> Self {
        Self {
            cache_ttl,
            state: Mutex::new(SamplerState {
                system: System::new(),
                last_refresh: None,
            }),
        }
    }

    /// Usage for each pid, in input order. Unknown pids read as zero.
    pub fn sample(&self, pids: &[u32]) -> Vec<ProcessUsage> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let stale = state
            .last_refresh
            .map(|t| t.elapsed() >= self.cache_ttl)
            .unwrap_or(true);
        if stale {
            state.system.refresh_processes_specifics(
                ProcessesToUpdate::All,
                true,
                ProcessRefreshKind::new().with_cpu().with_memory(),
            );
            state.last_refresh = Some(Instant::now());
        }

        pids.iter()
            .map(|&pid| {
                state
                    .system
                    .process(Pid::from_u32(pid))
                    .map(|process| ProcessUsage {
                        cpu: (process.cpu_usage() * 10.0).round() / 10.0,
                        ram_bytes: process.memory(),
                    })
                    .unwrap_or_default()
            })
            .collect()
    }
}

impl Default for ProcessSampler {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}
