//! corefleet core - headless orchestrator for running several proxy cores at once.
//!
//! Each node (a user-selected proxy profile) gets its own core process on its
//! own local port. The crate allocates ports, writes the per-node config,
//! spawns and supervises the executables, and reports running/stopped
//! transitions. It can be used programmatically without any HTTP/RPC layer;
//! see the `corefleet-rpc` crate for the JSON-RPC front-end.
//!
//! # Example
//!
//! ```rust,ignore
//! use corefleet_core::{FleetConfig, LogNoticeSink, NodeProfile, CoreType, Orchestrator};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> corefleet_core::Result<()> {
//!     let config = FleetConfig::with_root("/opt/corefleet");
//!     let fleet = Orchestrator::builder(config, Arc::new(LogNoticeSink)).build()?;
//!
//!     let profile = NodeProfile::new("5f2a", CoreType::Xray).with_remarks("Tokyo");
//!     if fleet.start_node(&profile).await {
//!         println!("running on {:?}", fleet.get_node_local_port("5f2a"));
//!     }
//!
//!     fleet.stop_all_nodes().await;
//!     Ok(())
//! }
//! ```

pub mod allocator;
pub mod config;
pub mod config_gen;
pub mod core_info;
pub mod error;
pub mod models;
pub mod notice;
pub mod notifier;
pub mod orchestrator;
pub mod platform;
pub mod process;
pub mod registry;
pub mod system;

// Re-export commonly used types
pub use allocator::{ListenerProbe, PortAllocator, SystemListenerProbe};
pub use config::{FleetConfig, FleetDefaults, InboundSettings, PathsConfig, ReadinessProbe};
pub use config_gen::{ConfigGenerator, GenerateResult, InboundConfigGenerator};
pub use core_info::{BuiltinCoreInfo, CoreInfo, CoreInfoProvider, CONFIG_PLACEHOLDER};
pub use error::{FleetError, Result};
pub use models::{
    BulkResult, CoreType, NodeProfile, NodeStatus, OrphanCleanup, StartedNode, StopReport,
};
pub use notice::{LogNoticeSink, Notice, NoticeSink, QueueNoticeSink};
pub use notifier::{
    ChannelObserver, NodeStatusEvent, StatusNotifier, StatusObserver, SubscriptionId,
};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use process::{CoreProcess, LaunchSpec, ProcessSupervisor};
pub use registry::{InsertOutcome, NodeLocks, NodeRegistry, PortReservation, RunningInstance};
pub use system::{ProcessSampler, ProcessUsage};
