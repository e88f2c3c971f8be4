//! HTTP server implementation using Axum.

use crate::events::EventLog;
use crate::handlers::{handle_health, handle_rpc};
use axum::{
    routing::{get, post},
    Router,
};
use corefleet_core::{Orchestrator, QueueNoticeSink};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Notify;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Maximum RPC requests handled at once.
const MAX_CONCURRENT_REQUESTS: usize = 64;

/// Application state shared across handlers.
pub struct AppState {
    /// The orchestrator
    pub fleet: Arc<Orchestrator>,
    /// User-facing messages waiting to be fetched
    pub notices: Arc<QueueNoticeSink>,
    /// Status events waiting to be fetched
    pub events: Arc<EventLog>,
    /// Signalled by the `shutdown` method
    pub shutdown: Arc<Notify>,
}

/// Start the JSON-RPC HTTP server.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(
    state: Arc<AppState>,
    host: &str,
    port: u16,
) -> anyhow::Result<SocketAddr> {
    // Configure CORS for development
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the router
    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/rpc", post(handle_rpc))
        .layer(ConcurrencyLimitLayer::new(MAX_CONCURRENT_REQUESTS))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    // Parse the address
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    // Bind to the address
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    // Spawn the server in the background
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {}", e);
        }
    });

    Ok(actual_addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use corefleet_core::FleetConfig;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_server_starts() {
        let temp_dir = TempDir::new().unwrap();
        let notices = Arc::new(QueueNoticeSink::new(8));
        let fleet = Orchestrator::builder(FleetConfig::with_root(temp_dir.path()), notices.clone())
            .build()
            .unwrap();

        let state = Arc::new(AppState {
            fleet: Arc::new(fleet),
            notices,
            events: Arc::new(EventLog::new(8)),
            shutdown: Arc::new(Notify::new()),
        });

        let addr = start_server(state, "127.0.0.1", 0).await.unwrap();
        assert!(addr.port() > 0);
    }
}
