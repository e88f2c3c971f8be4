//! corefleet RPC Server - JSON-RPC backend for a front-end process.
//!
//! This binary provides a JSON-RPC 2.0 server that wraps the corefleet-core
//! orchestrator. It is the composition root: the orchestrator and its
//! collaborators are built here and handed to the server explicitly.

mod events;
mod handlers;
mod server;
mod wrapper;

use anyhow::{Context, Result};
use clap::Parser;
use corefleet_core::{
    ChannelObserver, FleetConfig, FleetDefaults, Orchestrator, PathsConfig, QueueNoticeSink,
};
use events::EventLog;
use server::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "corefleet-rpc")]
#[command(about = "JSON-RPC server for the corefleet orchestrator")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Config file (defaults to corefleet.json in the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding the core executables (overrides the config file)
    #[arg(long)]
    bin_dir: Option<PathBuf>,
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join(FleetDefaults::APP_NAME))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(PathsConfig::CONFIG_FILE_NAME)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging; RUST_LOG wins over --debug when set
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting corefleet RPC Server");

    let config_path = args.config.unwrap_or_else(default_config_path);
    let mut config = FleetConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if let Some(bin_dir) = args.bin_dir {
        config.bin_dir = bin_dir;
    }

    let notices = Arc::new(QueueNoticeSink::new(FleetDefaults::NOTICE_QUEUE_CAPACITY));
    let fleet = Arc::new(Orchestrator::builder(config, notices.clone()).build()?);
    info!(
        "Core binaries: {}, node configs: {}",
        fleet.config().bin_dir.display(),
        fleet.config().bin_config_dir.display()
    );

    match fleet.cleanup_orphans().await {
        Ok(cleanup) => info!(
            "Startup cleanup: {} orphaned cores stopped, {} stale configs removed",
            cleanup.processes_stopped, cleanup.configs_removed
        ),
        Err(e) => warn!("Startup cleanup failed: {}", e),
    }

    // Status events are handled off the publisher's task
    let events = Arc::new(EventLog::new(FleetDefaults::NOTICE_QUEUE_CAPACITY));
    let (observer, receiver) = ChannelObserver::new();
    fleet.subscribe(Arc::new(observer));
    events::spawn_collector(receiver, Arc::clone(&events));

    let shutdown = Arc::new(Notify::new());
    let state = Arc::new(AppState {
        fleet: Arc::clone(&fleet),
        notices,
        events,
        shutdown: Arc::clone(&shutdown),
    });

    // Start the server
    let addr = server::start_server(state, &args.host, args.port).await?;

    // Print port for the front-end to read (intentional stdout for IPC)
    println!("RPC_PORT={}", addr.port());

    info!("RPC server running on {}", addr);

    // Wait for shutdown signal or a shutdown request
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutdown signal received");
        }
        _ = shutdown.notified() => {
            info!("Shutdown requested over RPC");
        }
    }

    let stopped = fleet.stop_all_nodes().await;
    info!("Stopped {} nodes, exiting", stopped);

    Ok(())
}
