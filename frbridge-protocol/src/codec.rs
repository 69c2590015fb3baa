//! Export record framing for the host channel.
//!
//! Each exported frame becomes one record:
//!
//! ```text
//! +-------------+--------+-----------+----------------+-------------+
//! | body_length | source | header    | payload        | frame CRC   |
//! | u16 LE      | u8     | 5 bytes   | len * 2 bytes  | 3 bytes BE  |
//! +-------------+--------+-----------+----------------+-------------+
//! ```
//!
//! `body_length` excludes itself: `1 + 5 + payload_len + 3`.

use crate::error::ProtocolError;
use crate::frame::{Frame, Source, MAX_FRAME_BYTES, MIN_FRAME_BYTES};
use bytes::{Buf, BufMut, BytesMut};

/// Size of the record length prefix.
pub const RECORD_LEN_SIZE: usize = 2;
/// Smallest record body: source byte plus a frame without payload.
pub const MIN_RECORD_BODY: usize = 1 + MIN_FRAME_BYTES;
/// Largest record body: source byte plus a maximal frame.
pub const MAX_RECORD_BODY: usize = 1 + MAX_FRAME_BYTES;

/// Encodes frames into export records.
pub struct Encoder;

impl Encoder {
    /// Total encoded size of the record for `frame`, prefix included.
    pub fn record_len(frame: &Frame) -> usize {
        RECORD_LEN_SIZE + 1 + frame.wire_len()
    }

    /// Appends the record for `frame` to `buf`.
    pub fn encode_record_into(frame: &Frame, buf: &mut BytesMut) {
        buf.reserve(Self::record_len(frame));
        buf.put_u16_le((1 + frame.wire_len()) as u16);
        buf.put_u8(frame.source.as_u8());
        frame.encode_into(buf);
    }

    /// Encodes a single record.
    pub fn encode_record(frame: &Frame) -> BytesMut {
        let mut buf = BytesMut::with_capacity(Self::record_len(frame));
        Self::encode_record_into(frame, &mut buf);
        buf
    }
}

/// Streaming decoder reassembling export records from a byte stream.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next record.
    ///
    /// Returns `Ok(None)` if more data is needed. A record whose length
    /// prefix is out of range leaves the stream unsynchronised; the
    /// buffer is cleared before the error is returned.
    pub fn decode_record(&mut self) -> Result<Option<Frame>, ProtocolError> {
        if self.buffer.len() < RECORD_LEN_SIZE {
            return Ok(None);
        }

        let body_len = u16::from_le_bytes([self.buffer[0], self.buffer[1]]) as usize;
        if body_len < MIN_RECORD_BODY {
            self.buffer.clear();
            return Err(ProtocolError::RecordTooShort { len: body_len });
        }
        if body_len > MAX_RECORD_BODY {
            self.buffer.clear();
            return Err(ProtocolError::RecordTooLarge {
                len: body_len,
                max: MAX_RECORD_BODY,
            });
        }
        if self.buffer.len() < RECORD_LEN_SIZE + body_len {
            return Ok(None);
        }

        self.buffer.advance(RECORD_LEN_SIZE);
        let mut body = self.buffer.split_to(body_len);
        let source = Source::from_u8(body.get_u8())?;
        let frame = Frame::decode(&body, source)?;
        if frame.wire_len() != body.len() {
            return Err(ProtocolError::RecordLengthMismatch {
                body: body.len(),
                frame: frame.wire_len(),
            });
        }
        Ok(Some(frame))
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

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Indicators;

    fn frame_6b(source: Source) -> Frame {
        Frame::new(0x6B, 1, Indicators::new(), &[0xAA, 0xBB], source).unwrap()
    }

    #[test]
    fn test_record_layout() {
        let record = Encoder::encode_record(&frame_6b(Source::Vehicle));
        assert_eq!(
            &record[..],
            &[0x0B, 0x00, 0x01, 0x00, 0x6B, 0x02, 0x66, 0x81, 0xAA, 0xBB, 0x10, 0x7E, 0x88]
        );
        assert_eq!(Encoder::record_len(&frame_6b(Source::Ecu)), 13);
    }

    #[test]
    fn test_decode_record_in_pieces() {
        let record = Encoder::encode_record(&frame_6b(Source::Ecu));
        let mut decoder = Decoder::new();

        decoder.extend(&record[..1]);
        assert!(decoder.decode_record().unwrap().is_none());
        decoder.extend(&record[1..7]);
        assert!(decoder.decode_record().unwrap().is_none());
        decoder.extend(&record[7..]);

        let frame = decoder.decode_record().unwrap().unwrap();
        assert_eq!(frame, frame_6b(Source::Ecu));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_multiple_records_in_buffer() {
        let first = frame_6b(Source::Ecu);
        let second = Frame::new(0x44, 9, Indicators::new().with_sync(), &[1, 2, 3, 4], Source::Vehicle)
            .unwrap();

        let mut buf = BytesMut::new();
        Encoder::encode_record_into(&first, &mut buf);
        Encoder::encode_record_into(&second, &mut buf);

        let mut decoder = Decoder::default();
        decoder.extend(&buf);
        assert_eq!(decoder.decode_record().unwrap(), Some(first));
        assert_eq!(decoder.decode_record().unwrap(), Some(second));
        assert_eq!(decoder.decode_record().unwrap(), None);
    }

    #[test]
    fn test_record_too_short_clears_buffer() {
        let mut decoder = Decoder::new();
        decoder.extend(&[0x03, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(
            decoder.decode_record(),
            Err(ProtocolError::RecordTooShort { len: 3 })
        );
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_record_too_large() {
        let mut decoder = Decoder::new();
        decoder.extend(&[0xFF, 0xFF]);
        assert!(matches!(
            decoder.decode_record(),
            Err(ProtocolError::RecordTooLarge { len: 0xFFFF, .. })
        ));
    }

    #[test]
    fn test_record_length_mismatch() {
        // body claims 13 bytes but the header describes a 10 byte frame
        let mut record = Encoder::encode_record(&frame_6b(Source::Ecu)).to_vec();
        record[0] = 0x0D;
        record.extend_from_slice(&[0, 0]);

        let mut decoder = Decoder::new();
        decoder.extend(&record);
        assert_eq!(
            decoder.decode_record(),
            Err(ProtocolError::RecordLengthMismatch { body: 12, frame: 10 })
        );
    }

    #[test]
    fn test_unknown_source_byte() {
        let mut record = Encoder::encode_record(&frame_6b(Source::Ecu)).to_vec();
        record[2] = 0x07;
        let mut decoder = Decoder::new();
        decoder.extend(&record);
        assert_eq!(
            decoder.decode_record(),
            Err(ProtocolError::UnknownSource(0x07))
        );
        // the record was consumed; the stream is still in sync
        assert_eq!(decoder.buffered(), 0);
    }
}
