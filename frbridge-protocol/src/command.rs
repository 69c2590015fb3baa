//! Host command stream.
//!
//! Commands arrive as a flat opcode stream:
//!
//! ```text
//! 0x00                                         padding, skipped
//! 0x90 | id u16 LE | base u8 | len u16 LE | data[len]   submit override
//! 0x91 | enabled u8                            set injection enable
//! 0x92                                         start export stream
//! ```
//!
//! Override data is self-identifying: `[id_hi, id_lo, base, replacement...]`,
//! the layout host tooling already sends (`00 44 00` for frame 0x44 base 0).

use crate::error::ProtocolError;
use crate::frame::MAX_PAYLOAD_BYTES;
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const OP_PADDING: u8 = 0x00;
pub const OP_SUBMIT_OVERRIDE: u8 = 0x90;
pub const OP_SET_INJECTION: u8 = 0x91;
pub const OP_START_EXPORT: u8 = 0x92;

/// Length of the self-identifying prefix on override data.
pub const OVERRIDE_PREFIX_LEN: usize = 3;
/// Largest override data accepted on the wire.
pub const MAX_OVERRIDE_DATA: usize = OVERRIDE_PREFIX_LEN + MAX_PAYLOAD_BYTES;

const SUBMIT_HEADER_LEN: usize = 1 + 2 + 1 + 2;

/// A parsed host command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    /// Replacement bytes for the next injection of frame `id` on cycle base `base`.
    SubmitOverride { id: u16, base: u8, data: Bytes },
    SetInjection { enabled: bool },
    /// Asks for the export record stream on this connection.
    StartExport,
}

impl HostCommand {
    /// Appends the wire encoding of this command to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            HostCommand::SubmitOverride { id, base, data } => {
                buf.reserve(SUBMIT_HEADER_LEN + data.len());
                buf.put_u8(OP_SUBMIT_OVERRIDE);
                buf.put_u16_le(*id);
                buf.put_u8(*base);
                buf.put_u16_le(data.len() as u16);
                buf.put_slice(data);
            }
            HostCommand::SetInjection { enabled } => {
                buf.put_u8(OP_SET_INJECTION);
                buf.put_u8(u8::from(*enabled));
            }
            HostCommand::StartExport => buf.put_u8(OP_START_EXPORT),
        }
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf
    }

    pub fn name(&self) -> &'static str {
        match self {
            HostCommand::SubmitOverride { .. } => "submit_override",
            HostCommand::SetInjection { .. } => "set_injection",
            HostCommand::StartExport => "start_export",
        }
    }
}

/// Builds self-identifying override data for frame `id` on cycle base `base`.
pub fn override_slice(id: u16, base: u8, replacement: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(OVERRIDE_PREFIX_LEN + replacement.len());
    buf.put_u16(id);
    buf.put_u8(base);
    buf.put_slice(replacement);
    buf.freeze()
}

/// Streaming decoder for the host command stream.
pub struct CommandDecoder {
    buffer: BytesMut,
}

impl CommandDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next command.
    ///
    /// Padding bytes are skipped. An unknown opcode or an oversized
    /// override discards everything buffered and returns the error.
    pub fn decode_command(&mut self) -> Result<Option<HostCommand>, ProtocolError> {
        while self.buffer.first() == Some(&OP_PADDING) {
            self.buffer.advance(1);
        }

        let Some(&opcode) = self.buffer.first() else {
            return Ok(None);
        };

        match opcode {
            OP_SUBMIT_OVERRIDE => {
                if self.buffer.len() < SUBMIT_HEADER_LEN {
                    return Ok(None);
                }
                let len = u16::from_le_bytes([self.buffer[4], self.buffer[5]]) as usize;
                if len > MAX_OVERRIDE_DATA {
                    self.buffer.clear();
                    return Err(ProtocolError::OverrideTooLarge {
                        len,
                        max: MAX_OVERRIDE_DATA,
                    });
                }
                if self.buffer.len() < SUBMIT_HEADER_LEN + len {
                    return Ok(None);
                }

                self.buffer.advance(1);
                let id = self.buffer.get_u16_le();
                let base = self.buffer.get_u8();
                self.buffer.advance(2);
                let data = self.buffer.split_to(len).freeze();
                Ok(Some(HostCommand::SubmitOverride { id, base, data }))
            }
            OP_SET_INJECTION => {
                if self.buffer.len() < 2 {
                    return Ok(None);
                }
                self.buffer.advance(1);
                let enabled = self.buffer.get_u8() != 0;
                Ok(Some(HostCommand::SetInjection { enabled }))
            }
            OP_START_EXPORT => {
                self.buffer.advance(1);
                Ok(Some(HostCommand::StartExport))
            }
            other => {
                self.buffer.clear();
                Err(ProtocolError::UnknownOpcode(other))
            }
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for CommandDecoder {
    fn default() -> Self {
        Self::new()
    }
}
