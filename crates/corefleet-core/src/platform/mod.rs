//! Platform abstraction layer.
//!
//! All `#[cfg]` blocks for OS-specific behavior live here rather than being
//! scattered through the orchestrator:
//! - `process` - liveness checks, signals, termination, command-line and
//!   working-directory lookups
//! - `ports` - the host's table of listening TCP sockets

pub mod ports;
pub mod process;

pub use ports::active_tcp_listeners;
pub use process::{
    find_processes_by_cmdline, is_process_alive, process_cwd, request_graceful_stop,
    terminate_process,
};
