//! Core process lifecycle.
//!
//! - `launch` - what to run and where
//! - `supervisor` - spawn, readiness probe, bounded stop
//! - `output` - stdout/stderr draining and the diagnostic tail

mod launch;
mod output;
mod supervisor;

pub use launch::LaunchSpec;
pub use output::OutputTail;
pub use supervisor::{CoreProcess, ProcessSupervisor};
