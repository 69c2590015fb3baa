//! Bus frame layout, decoding and validation.
//!
//! Wire layout (5 byte header + payload + 3 byte trailer):
//!
//! ```text
//! byte 0  | ind(5) | id[10:8](3) |     ind = reserved|preamble|null|sync|startup
//! byte 1  | id[7:0]              |
//! byte 2  | len(7) | hcrc[10]    |     len = payload length in 16-bit words
//! byte 3  | hcrc[9:2]            |
//! byte 4  | hcrc[1:0] | cycle(6) |
//! payload | len * 2 bytes        |
//! trailer | frame CRC-24, big-endian |
//! ```
//!
//! All fields are extracted with explicit shifts and masks.

use crate::crc;
use crate::error::ProtocolError;
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

/// Size of the frame header in bytes.
pub const HEADER_SIZE: usize = 5;
/// Size of the trailing frame CRC in bytes.
pub const TRAILER_SIZE: usize = 3;
/// Largest payload length field value.
pub const MAX_PAYLOAD_WORDS: u8 = 127;
/// Largest payload in bytes.
pub const MAX_PAYLOAD_BYTES: usize = MAX_PAYLOAD_WORDS as usize * 2;
/// Largest frame on the wire (262 bytes).
pub const MAX_FRAME_BYTES: usize = HEADER_SIZE + MAX_PAYLOAD_BYTES + TRAILER_SIZE;
/// Smallest complete frame: header plus trailer.
pub const MIN_FRAME_BYTES: usize = HEADER_SIZE + TRAILER_SIZE;
/// Largest frame identifier (11 bits).
pub const MAX_FRAME_ID: u16 = 0x7FF;
/// Largest cycle counter value (6 bits).
pub const MAX_CYCLE: u8 = 63;

/// Capture direction a frame was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Source {
    /// Captured on the ECU side of the interceptor.
    Ecu = 0,
    /// Captured on the vehicle side of the interceptor.
    Vehicle = 1,
    Unknown = 0xFF,
}

impl Source {
    /// Parses the source byte used in export records.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(Source::Ecu),
            1 => Ok(Source::Vehicle),
            0xFF => Ok(Source::Unknown),
            other => Err(ProtocolError::UnknownSource(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Index for per-direction tables, `None` for [`Source::Unknown`].
    pub fn index(self) -> Option<usize> {
        match self {
            Source::Ecu => Some(0),
            Source::Vehicle => Some(1),
            Source::Unknown => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Source::Ecu => "ecu",
            Source::Vehicle => "vehicle",
            Source::Unknown => "unknown",
        }
    }
}

/// Transmit direction for an armed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    ToEcu,
    ToVehicle,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::ToEcu => "to_ecu",
            Direction::ToVehicle => "to_vehicle",
        }
    }
}

/// The five header indicator bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Indicators(u8);

impl Indicators {
    pub const RESERVED: u8 = 1 << 4;
    pub const PAYLOAD_PREAMBLE: u8 = 1 << 3;
    pub const NULL_FRAME: u8 = 1 << 2;
    pub const SYNC: u8 = 1 << 1;
    pub const STARTUP: u8 = 1 << 0;

    const MASK: u8 = 0x1F;

    pub fn new() -> Self {
        Self(0)
    }

    /// Builds from raw bits; bits above the low five are dropped.
    pub fn from_bits(bits: u8) -> Self {
        Self(bits & Self::MASK)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn with_sync(mut self) -> Self {
        self.0 |= Self::SYNC;
        self
    }

    pub fn with_startup(mut self) -> Self {
        self.0 |= Self::STARTUP;
        self
    }

    pub fn with_null_frame(mut self) -> Self {
        self.0 |= Self::NULL_FRAME;
        self
    }

    pub fn with_payload_preamble(mut self) -> Self {
        self.0 |= Self::PAYLOAD_PREAMBLE;
        self
    }

    pub fn is_reserved(&self) -> bool {
        self.0 & Self::RESERVED != 0
    }

    pub fn has_payload_preamble(&self) -> bool {
        self.0 & Self::PAYLOAD_PREAMBLE != 0
    }

    pub fn null_frame(&self) -> bool {
        self.0 & Self::NULL_FRAME != 0
    }

    pub fn is_sync(&self) -> bool {
        self.0 & Self::SYNC != 0
    }

    pub fn is_startup(&self) -> bool {
        self.0 & Self::STARTUP != 0
    }
}

/// A decoded bus frame.
///
/// The payload is stored inline so frames can move through the fixed
/// capacity queues without allocation; only the first
/// [`Frame::payload_len`] bytes are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub frame_id: u16,
    pub cycle_count: u8,
    pub payload_length_words: u8,
    pub indicators: Indicators,
    pub header_crc: u16,
    /// Trailing CRC as captured, 0 if the trailer was not present.
    pub frame_crc: u32,
    pub payload: [u8; MAX_PAYLOAD_BYTES],
    pub source: Source,
}

impl Frame {
    /// Builds a frame with both CRCs computed from the given fields.
    pub fn new(
        frame_id: u16,
        cycle_count: u8,
        indicators: Indicators,
        payload: &[u8],
        source: Source,
    ) -> Result<Self, ProtocolError> {
        if frame_id > MAX_FRAME_ID {
            return Err(ProtocolError::InvalidFrameId(frame_id));
        }
        if cycle_count > MAX_CYCLE {
            return Err(ProtocolError::InvalidCycle(cycle_count));
        }
        if payload.len() > MAX_PAYLOAD_BYTES {
            return Err(ProtocolError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_BYTES,
            });
        }
        if payload.len() % 2 != 0 {
            return Err(ProtocolError::OddPayloadLength(payload.len()));
        }

        let mut frame = Self {
            frame_id,
            cycle_count,
            payload_length_words: (payload.len() / 2) as u8,
            indicators,
            header_crc: 0,
            frame_crc: 0,
            payload: [0; MAX_PAYLOAD_BYTES],
            source,
        };
        frame.payload[..payload.len()].copy_from_slice(payload);
        frame.header_crc = frame.computed_header_crc();
        frame.frame_crc = if frame.is_null() {
            0
        } else {
            frame.computed_frame_crc()
        };
        Ok(frame)
    }

    /// Decodes a frame from a byte slice holding header, payload and trailer.
    ///
    /// Bytes past the end of the frame are ignored. A missing or partial
    /// trailer is not an error: `frame_crc` is reported as 0 and
    /// [`Frame::is_valid`] will refuse the frame.
    pub fn decode(raw: &[u8], source: Source) -> Result<Self, ProtocolError> {
        let header: [u8; HEADER_SIZE] = raw
            .get(..HEADER_SIZE)
            .and_then(|h| h.try_into().ok())
            .ok_or(ProtocolError::HeaderTruncated { len: raw.len() })?;

        let indicators = Indicators::from_bits(header[0] >> 3);
        let frame_id = (((header[0] & 0x07) as u16) << 8) | header[1] as u16;
        let payload_length_words = header[2] >> 1;
        let header_crc = (((header[2] & 0x01) as u16) << 10)
            | ((header[3] as u16) << 2)
            | (header[4] >> 6) as u16;
        let cycle_count = header[4] & 0x3F;

        let payload_len = payload_length_words as usize * 2;
        if payload_len > MAX_PAYLOAD_BYTES {
            return Err(ProtocolError::PayloadTooLarge {
                len: payload_len,
                max: MAX_PAYLOAD_BYTES,
            });
        }

        let payload_end = HEADER_SIZE + payload_len;
        let body = raw
            .get(HEADER_SIZE..payload_end)
            .ok_or(ProtocolError::PayloadTruncated {
                needed: payload_end,
                available: raw.len(),
            })?;

        let frame_crc = raw
            .get(payload_end..payload_end + TRAILER_SIZE)
            .map(|t| u32::from_be_bytes([0, t[0], t[1], t[2]]))
            .unwrap_or(0);

        let mut payload = [0u8; MAX_PAYLOAD_BYTES];
        payload[..payload_len].copy_from_slice(body);

        Ok(Self {
            frame_id,
            cycle_count,
            payload_length_words,
            indicators,
            header_crc,
            frame_crc,
            payload,
            source,
        })
    }

    /// Decodes from a slice whose frame length is supplied externally,
    /// as when frames are cut out of a shared capture ring.
    pub fn decode_slice(raw: &[u8], len: usize, source: Source) -> Result<Self, ProtocolError> {
        let len = len.min(raw.len());
        Self::decode(&raw[..len], source)
    }

    /// Returns true if the header CRC matches and, for frames with a
    /// payload, the captured trailer matches the frame CRC of `raw`.
    ///
    /// A frame without payload is valid only when its trailer is zero.
    /// `raw` must contain the complete frame, trailer included.
    pub fn is_valid(&self, raw: &[u8]) -> bool {
        if self.frame_id > MAX_FRAME_ID || self.payload_length_words > MAX_PAYLOAD_WORDS {
            return false;
        }
        if raw.len() < self.wire_len() || !self.header_crc_matches() {
            return false;
        }
        if self.is_null() {
            return self.frame_crc == 0;
        }
        crc::frame_crc(&raw[..HEADER_SIZE + self.payload_len()]) == self.frame_crc
    }

    pub fn header_crc_matches(&self) -> bool {
        self.computed_header_crc() == self.header_crc
    }

    pub fn computed_header_crc(&self) -> u16 {
        crc::header_crc(
            self.indicators.bits(),
            self.frame_id,
            self.payload_length_words,
        )
    }

    /// Frame CRC over the reconstructed header and payload.
    pub fn computed_frame_crc(&self) -> u32 {
        let crc = crc::frame_crc(&self.header_bytes());
        crc::frame_crc_update(crc, self.payload())
    }

    /// True when the payload length field is zero.
    pub fn is_null(&self) -> bool {
        self.payload_length_words == 0
    }

    pub fn payload_len(&self) -> usize {
        self.payload_length_words as usize * 2
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.payload_len()]
    }

    /// Length on the wire: header, payload and trailer.
    pub fn wire_len(&self) -> usize {
        HEADER_SIZE + self.payload_len() + TRAILER_SIZE
    }

    /// Reassembles the five header bytes from the decoded fields.
    pub fn header_bytes(&self) -> [u8; HEADER_SIZE] {
        let hcrc = self.header_crc & 0x7FF;
        [
            (self.indicators.bits() << 3) | ((self.frame_id >> 8) as u8 & 0x07),
            self.frame_id as u8,
            (self.payload_length_words << 1) | (hcrc >> 10) as u8,
            (hcrc >> 2) as u8,
            ((hcrc as u8 & 0x03) << 6) | (self.cycle_count & 0x3F),
        ]
    }

    /// Writes header, payload and trailer into `buf`.
    pub fn encode_into<B: BufMut>(&self, buf: &mut B) {
        buf.put_slice(&self.header_bytes());
        buf.put_slice(self.payload());
        let crc = self.frame_crc.to_be_bytes();
        buf.put_slice(&crc[1..]);
    }

    /// Encodes the frame into its wire bytes.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        self.encode_into(&mut buf);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const FRAME_6B: [u8; 10] = [0x00, 0x6B, 0x02, 0x66, 0x81, 0xAA, 0xBB, 0x10, 0x7E, 0x88];

    #[test]
    fn test_decode_known_frame() {
        let frame = Frame::decode(&FRAME_6B, Source::Ecu).unwrap();

        assert_eq!(frame.frame_id, 0x6B);
        assert_eq!(frame.cycle_count, 1);
        assert_eq!(frame.payload_length_words, 1);
        assert_eq!(frame.payload(), &[0xAA, 0xBB]);
        assert_eq!(frame.header_crc, 0x19A);
        assert_eq!(frame.frame_crc, 0x10_7E88);
        assert_eq!(frame.source, Source::Ecu);
        assert!(frame.is_valid(&FRAME_6B));
    }

    #[test]
    fn test_corrupted_payload_invalidates_frame() {
        let clean = Frame::decode(&FRAME_6B, Source::Vehicle).unwrap();

        for idx in HEADER_SIZE..HEADER_SIZE + 2 {
            let mut raw = FRAME_6B;
            raw[idx] ^= 0x01;
            let frame = Frame::decode(&raw, Source::Vehicle).unwrap();

            assert!(!frame.is_valid(&raw));
            assert_eq!(frame.frame_id, clean.frame_id);
            assert_eq!(frame.cycle_count, clean.cycle_count);
            assert_eq!(frame.payload_length_words, clean.payload_length_words);
            assert_eq!(frame.header_crc, clean.header_crc);
        }
    }

    #[test]
    fn test_wrong_header_crc_is_invalid() {
        // same id/cycle/length but the header CRC bits do not match
        let raw = [0x00, 0x6B, 0x02, 0x00, 0x41, 0xAA, 0xBB, 0x00, 0x00, 0x00];
        let frame = Frame::decode(&raw, Source::Ecu).unwrap();

        assert_eq!(frame.frame_id, 0x6B);
        assert_eq!(frame.cycle_count, 1);
        assert!(!frame.header_crc_matches());
        assert!(!frame.is_valid(&raw));
    }

    #[test]
    fn test_header_truncated() {
        let result = Frame::decode(&FRAME_6B[..4], Source::Ecu);
        assert_eq!(result, Err(ProtocolError::HeaderTruncated { len: 4 }));
    }

    #[test]
    fn test_payload_truncated() {
        let result = Frame::decode(&FRAME_6B[..6], Source::Ecu);
        assert_eq!(
            result,
            Err(ProtocolError::PayloadTruncated {
                needed: 7,
                available: 6
            })
        );
    }

    #[test]
    fn test_trailer_truncated_reports_zero_crc() {
        let raw = &FRAME_6B[..8];
        let frame = Frame::decode(raw, Source::Ecu).unwrap();
        assert_eq!(frame.frame_crc, 0);
        assert!(!frame.is_valid(raw));
    }

    #[test]
    fn test_decode_slice_limits_length() {
        let mut ring = [0xEEu8; 32];
        ring[..FRAME_6B.len()].copy_from_slice(&FRAME_6B);

        let frame = Frame::decode_slice(&ring, FRAME_6B.len(), Source::Ecu).unwrap();
        assert!(frame.is_valid(&ring[..FRAME_6B.len()]));

        let short = Frame::decode_slice(&ring, 8, Source::Ecu).unwrap();
        assert_eq!(short.frame_crc, 0);

        // externally supplied length past the slice is clamped
        let clamped = Frame::decode_slice(&FRAME_6B, 100, Source::Ecu).unwrap();
        assert_eq!(clamped.frame_crc, 0x10_7E88);
    }

    #[test]
    fn test_null_frame_requires_zero_trailer() {
        let frame = Frame::new(0x10, 3, Indicators::new().with_null_frame(), &[], Source::Ecu)
            .unwrap();
        let raw = frame.encode();
        assert_eq!(&raw[..], &[0x20, 0x10, 0x01, 0x2D, 0x43, 0x00, 0x00, 0x00]);
        assert!(frame.is_valid(&raw));

        let mut bad = raw.to_vec();
        bad[7] = 0x01;
        let decoded = Frame::decode(&bad, Source::Ecu).unwrap();
        assert!(!decoded.is_valid(&bad));
    }

    #[test]
    fn test_new_matches_wire_bytes() {
        let frame = Frame::new(0x6B, 1, Indicators::new(), &[0xAA, 0xBB], Source::Ecu).unwrap();
        assert_eq!(&frame.encode()[..], &FRAME_6B);
        assert_eq!(frame.wire_len(), FRAME_6B.len());
    }

    #[test]
    fn test_new_rejects_bad_fields() {
        assert_eq!(
            Frame::new(0x800, 0, Indicators::new(), &[], Source::Ecu),
            Err(ProtocolError::InvalidFrameId(0x800))
        );
        assert_eq!(
            Frame::new(1, 64, Indicators::new(), &[], Source::Ecu),
            Err(ProtocolError::InvalidCycle(64))
        );
        assert_eq!(
            Frame::new(1, 0, Indicators::new(), &[1, 2, 3], Source::Ecu),
            Err(ProtocolError::OddPayloadLength(3))
        );
        assert!(matches!(
            Frame::new(1, 0, Indicators::new(), &[0; 256], Source::Ecu),
            Err(ProtocolError::PayloadTooLarge { len: 256, .. })
        ));
    }

    #[test]
    fn test_indicators() {
        let ind = Indicators::new().with_sync().with_startup();
        assert!(ind.is_sync());
        assert!(ind.is_startup());
        assert!(!ind.null_frame());
        assert!(!ind.has_payload_preamble());
        assert!(!ind.is_reserved());
        assert_eq!(Indicators::from_bits(0xFF).bits(), 0x1F);
    }

    #[test]
    fn test_source_byte() {
        assert_eq!(Source::from_u8(0), Ok(Source::Ecu));
        assert_eq!(Source::from_u8(1), Ok(Source::Vehicle));
        assert_eq!(Source::from_u8(0xFF), Ok(Source::Unknown));
        assert_eq!(Source::from_u8(2), Err(ProtocolError::UnknownSource(2)));
        assert_eq!(Source::Vehicle.as_u8(), 1);
        assert_eq!(Source::Unknown.index(), None);
    }

    #[test]
    fn test_direction_serde_names() {
        let json = serde_json::to_string(&Direction::ToVehicle).unwrap();
        assert_eq!(json, "\"to_vehicle\"");
        let parsed: Direction = serde_json::from_str("\"to_ecu\"").unwrap();
        assert_eq!(parsed, Direction::ToEcu);
    }

    proptest! {
        #[test]
        fn prop_encode_decode_roundtrip(
            frame_id in 0u16..=MAX_FRAME_ID,
            cycle in 0u8..=MAX_CYCLE,
            bits in 0u8..32,
            words in proptest::collection::vec(any::<u16>(), 0..=127),
        ) {
            let payload: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
            let frame = Frame::new(frame_id, cycle, Indicators::from_bits(bits), &payload, Source::Vehicle).unwrap();
            let raw = frame.encode();
            let decoded = Frame::decode(&raw, Source::Vehicle).unwrap();

            prop_assert_eq!(decoded, frame);
            prop_assert!(decoded.is_valid(&raw));
        }

        #[test]
        fn prop_decode_never_reads_past_slice(raw in proptest::collection::vec(any::<u8>(), 0..20)) {
            match Frame::decode(&raw, Source::Ecu) {
                Ok(frame) => {
                    prop_assert!(frame.payload_len() + HEADER_SIZE <= raw.len());
                    let _ = frame.is_valid(&raw);
                }
                Err(err) => {
                    let truncated = matches!(
                        err,
                        ProtocolError::HeaderTruncated { .. } | ProtocolError::PayloadTruncated { .. }
                    );
                    prop_assert!(truncated, "unexpected error: {}", err);
                }
            }
        }

        #[test]
        fn prop_decode_slice_with_random_length(
            raw in proptest::collection::vec(any::<u8>(), 20),
            len in 0usize..64,
        ) {
            let _ = Frame::decode_slice(&raw, len, Source::Unknown);
        }
    }
}
