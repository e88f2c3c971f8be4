//! Error types for corefleet.
//!
//! Every failure the orchestrator can report has its own variant so the
//! front-end gets a specific message ("port already in use", "failed to find
//! available port") instead of a generic error code.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the corefleet library.
#[derive(Debug, Error)]
pub enum FleetError {
    // Validation errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Invalid params: {message}")]
    InvalidParams { message: String },

    // Node lifecycle errors
    #[error("Node {summary} is already running")]
    AlreadyRunning { index_id: String, summary: String },

    #[error("Port {port} is already in use by another node")]
    PortConflict { port: u16 },

    #[error("Failed to find available port in range {start}..{end}")]
    PortExhausted { start: u32, end: u32 },

    #[error("Config generation failed for {index_id}: {message}")]
    ConfigGeneration { index_id: String, message: String },

    #[error("Core executable not found for {core}: {message}")]
    ExecutableResolution { core: String, message: String },

    #[error("Failed to start node {summary}: {message}")]
    ProcessStart { summary: String, message: String },

    #[error("Node {index_id} is not running")]
    NotRunning { index_id: String },

    #[error("Node {index_id} exited unexpectedly")]
    ProcessCrashed { index_id: String },

    #[error("Failed to remove {path}: {message}")]
    FileCleanup { path: PathBuf, message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for corefleet operations.
pub type Result<T> = std::result::Result<T, FleetError>;

impl From<std::io::Error> for FleetError {
    fn from(err: std::io::Error) -> Self {
        FleetError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for FleetError {
    fn from(err: serde_json::Error) -> Self {
        FleetError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl FleetError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        FleetError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Custom error codes (application-defined, -32000 to -32099):
    /// - -32010: Node already running
    /// - -32011: Port conflict or port range exhausted
    /// - -32012: Config generation / executable resolution failed
    /// - -32013: Core process failed to start or crashed
    /// - -32014: Node not running
    /// - -32602: Invalid params / validation
    /// - -32603: Internal error
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            FleetError::AlreadyRunning { .. } => -32010,

            FleetError::PortConflict { .. } | FleetError::PortExhausted { .. } => -32011,

            FleetError::ConfigGeneration { .. } | FleetError::ExecutableResolution { .. } => {
                -32012
            }

            FleetError::ProcessStart { .. } | FleetError::ProcessCrashed { .. } => -32013,

            FleetError::NotRunning { .. } => -32014,

            FleetError::Validation { .. } | FleetError::InvalidParams { .. } => -32602,

            _ => -32603,
        }
    }
}
