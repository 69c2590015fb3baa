//! Core error types.

use frbridge_protocol::ProtocolError;
use thiserror::Error;

/// Errors from building or driving the frame processing engine.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid {what} capacity: {capacity} (must be a non-zero power of two)")]
    InvalidCapacity { what: &'static str, capacity: usize },

    #[error("invalid {kind} rule #{index}: {reason}")]
    InvalidRule {
        kind: &'static str,
        index: usize,
        reason: String,
    },

    #[error("capture source must be ecu or vehicle")]
    UnknownSource,

    #[error("override prefix does not identify frame {id:#x} base {base}")]
    OverridePrefixMismatch { id: u16, base: u8 },

    #[error("no trigger rule for frame {id:#x} base {base} with replace length {len}")]
    NoMatchingTrigger { id: u16, base: u8, len: usize },

    #[error("override ring busy")]
    OverrideRingBusy,

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl CoreError {
    /// Returns whether the operation may succeed if repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::OverrideRingBusy)
    }

    /// Returns an error code suitable for logs and metric labels.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::InvalidCapacity { .. } => "INVALID_CAPACITY",
            CoreError::InvalidRule { .. } => "INVALID_RULE",
            CoreError::UnknownSource => "UNKNOWN_SOURCE",
            CoreError::OverridePrefixMismatch { .. } => "OVERRIDE_PREFIX_MISMATCH",
            CoreError::NoMatchingTrigger { .. } => "NO_MATCHING_TRIGGER",
            CoreError::OverrideRingBusy => "OVERRIDE_RING_BUSY",
            CoreError::Protocol(e) => e.error_code(),
        }
    }
}
