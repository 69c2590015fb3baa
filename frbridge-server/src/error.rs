//! Server error types.

use crate::config::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

/// Bridge daemon errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] frbridge_protocol::ProtocolError),

    #[error("core error: {0}")]
    Core(#[from] frbridge_core::CoreError),

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("capture file '{}': {reason}", path.display())]
    CaptureFile { path: PathBuf, reason: String },

    #[error("server shutting down")]
    ShuttingDown,
}

impl ServerError {
    /// Returns an error code suitable for logs and metric labels.
    pub fn error_code(&self) -> &'static str {
        match self {
            ServerError::Io(_) => "IO_ERROR",
            ServerError::Protocol(e) => e.error_code(),
            ServerError::Core(e) => e.error_code(),
            ServerError::Config(_) => "CONFIG_ERROR",
            ServerError::Metrics(_) => "METRICS_ERROR",
            ServerError::CaptureFile { .. } => "CAPTURE_FILE_ERROR",
            ServerError::ShuttingDown => "SHUTTING_DOWN",
        }
    }

    /// Returns whether the host may retry the operation.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServerError::Io(_) => true,
            ServerError::Core(e) => e.is_retryable(),
            _ => false,
        }
    }
}
