//! Protocol error types.

use thiserror::Error;

/// Errors raised while decoding frames, export records or host commands.
///
/// All of these describe malformed input. None of them is fatal to the
/// caller; they are counted and the offending bytes are discarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("header truncated: {len} bytes available (need 5)")]
    HeaderTruncated { len: usize },

    #[error("payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("payload length must be a whole number of words, got {0} bytes")]
    OddPayloadLength(usize),

    #[error("payload truncated: need {needed} bytes, have {available}")]
    PayloadTruncated { needed: usize, available: usize },

    #[error("frame id out of range: {0:#x}")]
    InvalidFrameId(u16),

    #[error("cycle count out of range: {0}")]
    InvalidCycle(u8),

    #[error("record body too short: {len} bytes")]
    RecordTooShort { len: usize },

    #[error("record body too large: {len} bytes (max {max})")]
    RecordTooLarge { len: usize, max: usize },

    #[error("record length mismatch: body carries {body} frame bytes, header implies {frame}")]
    RecordLengthMismatch { body: usize, frame: usize },

    #[error("unknown source byte: {0:#04x}")]
    UnknownSource(u8),

    #[error("unknown command opcode: {0:#04x}")]
    UnknownOpcode(u8),

    #[error("override data too large: {len} bytes (max {max})")]
    OverrideTooLarge { len: usize, max: usize },
}

impl ProtocolError {
    /// Short stable label used for log fields and metric labels.
    pub fn error_code(&self) -> &'static str {
        match self {
            ProtocolError::HeaderTruncated { .. } => "HEADER_TRUNCATED",
            ProtocolError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            ProtocolError::OddPayloadLength(_) => "ODD_PAYLOAD_LENGTH",
            ProtocolError::PayloadTruncated { .. } => "PAYLOAD_TRUNCATED",
            ProtocolError::InvalidFrameId(_) => "INVALID_FRAME_ID",
            ProtocolError::InvalidCycle(_) => "INVALID_CYCLE",
            ProtocolError::RecordTooShort { .. } => "RECORD_TOO_SHORT",
            ProtocolError::RecordTooLarge { .. } => "RECORD_TOO_LARGE",
            ProtocolError::RecordLengthMismatch { .. } => "RECORD_LENGTH_MISMATCH",
            ProtocolError::UnknownSource(_) => "UNKNOWN_SOURCE",
            ProtocolError::UnknownOpcode(_) => "UNKNOWN_OPCODE",
            ProtocolError::OverrideTooLarge { .. } => "OVERRIDE_TOO_LARGE",
        }
    }

    /// Returns true if the error leaves a byte stream out of sync, so the
    /// buffered remainder must be discarded.
    pub fn desyncs_stream(&self) -> bool {
        matches!(
            self,
            ProtocolError::RecordTooShort { .. }
                | ProtocolError::RecordTooLarge { .. }
                | ProtocolError::UnknownOpcode(_)
                | ProtocolError::OverrideTooLarge { .. }
        )
    }
}
