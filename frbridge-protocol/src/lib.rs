//! # frbridge-protocol
//!
//! Byte-level protocol for the frbridge bus interceptor.
//!
//! This crate provides:
//! - Header CRC-11, frame CRC-24 and end-to-end CRC-8, table driven
//! - Frame decoding, validation and encoding with explicit bit-field extraction
//! - Export record framing for the host channel
//! - Host command parsing (override submission, injection enable, export start)

pub mod codec;
pub mod command;
pub mod crc;
pub mod error;
pub mod frame;

pub use codec::{Decoder, Encoder, MAX_RECORD_BODY, MIN_RECORD_BODY, RECORD_LEN_SIZE};
pub use command::{override_slice, CommandDecoder, HostCommand, OVERRIDE_PREFIX_LEN};
pub use error::ProtocolError;
pub use frame::{
    Direction, Frame, Indicators, Source, HEADER_SIZE, MAX_CYCLE, MAX_FRAME_BYTES, MAX_FRAME_ID,
    MAX_PAYLOAD_BYTES, MAX_PAYLOAD_WORDS, MIN_FRAME_BYTES, TRAILER_SIZE,
};

/// Default TCP port for the host channel.
pub const DEFAULT_PORT: u16 = 7800;
