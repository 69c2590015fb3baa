//! Protocol checksums.
//!
//! Three independent CRCs protect a frame:
//!
//! ```text
//! header CRC-11   poly 0x385     init 0x1A      over sync|startup|frame_id|payload_len (20 bits)
//! frame CRC-24    poly 0x5D6DCB  init 0xFEDCBA  over header bytes + payload bytes
//! E2E CRC-8       poly 0x1D      init per rule  over a payload sub-range
//! ```
//!
//! All three are MSB-first with no reflection and no final xor. The lookup
//! tables are generated at compile time.

/// Header CRC generator polynomial.
pub const HEADER_CRC_POLY: u16 = 0x385;
/// Header CRC initial register.
pub const HEADER_CRC_INIT: u16 = 0x1A;
/// Frame CRC generator polynomial.
pub const FRAME_CRC_POLY: u32 = 0x5D_6DCB;
/// Frame CRC initial register.
pub const FRAME_CRC_INIT: u32 = 0xFE_DCBA;
/// End-to-end CRC generator polynomial (SAE J1850).
pub const E2E_CRC_POLY: u8 = 0x1D;

const HEADER_CRC_MASK: u16 = 0x7FF;
const FRAME_CRC_MASK: u32 = 0xFF_FFFF;

static HEADER_TABLE: [u16; 256] = header_table();
static HEADER_NIBBLE_TABLE: [u16; 16] = header_nibble_table();
static FRAME_TABLE: [u32; 256] = frame_table();
static E2E_TABLE: [u8; 256] = e2e_table();

const fn header_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 3;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x400 != 0 {
                (crc << 1) ^ HEADER_CRC_POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc & HEADER_CRC_MASK;
        i += 1;
    }
    table
}

const fn header_nibble_table() -> [u16; 16] {
    let mut table = [0u16; 16];
    let mut i = 0;
    while i < 16 {
        let mut crc = (i as u16) << 7;
        let mut bit = 0;
        while bit < 4 {
            crc = if crc & 0x400 != 0 {
                (crc << 1) ^ HEADER_CRC_POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc & HEADER_CRC_MASK;
        i += 1;
    }
    table
}

const fn frame_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x80_0000 != 0 {
                (crc << 1) ^ FRAME_CRC_POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc & FRAME_CRC_MASK;
        i += 1;
    }
    table
}

const fn e2e_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ E2E_CRC_POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Packs the header fields covered by the header CRC into the 20-bit word
/// `sync | startup | frame_id(11) | payload_length_words(7)`.
///
/// Only the sync and startup indicator bits take part; the reserved,
/// payload-preamble and null-frame bits are outside the protected window.
pub fn header_crc_word(indicators: u8, frame_id: u16, payload_length_words: u8) -> u32 {
    (((indicators as u32) & 0b11) << 18)
        | (((frame_id as u32) & 0x7FF) << 7)
        | ((payload_length_words as u32) & 0x7F)
}

/// Computes the 11-bit header CRC over a packed 20-bit header word.
pub fn header_crc_of_word(word: u32) -> u16 {
    let mut crc = HEADER_CRC_INIT;
    for byte in [((word >> 12) & 0xFF) as u8, ((word >> 4) & 0xFF) as u8] {
        let idx = ((crc >> 3) as u8) ^ byte;
        crc = ((crc << 8) & HEADER_CRC_MASK) ^ HEADER_TABLE[idx as usize];
    }
    let idx = ((crc >> 7) as u8 & 0x0F) ^ (word as u8 & 0x0F);
    ((crc << 4) & HEADER_CRC_MASK) ^ HEADER_NIBBLE_TABLE[idx as usize]
}

/// Computes the 11-bit header CRC for the given header fields.
pub fn header_crc(indicators: u8, frame_id: u16, payload_length_words: u8) -> u16 {
    header_crc_of_word(header_crc_word(
        indicators,
        frame_id,
        payload_length_words,
    ))
}

/// Computes the 24-bit frame CRC over header bytes followed by payload bytes.
pub fn frame_crc(data: &[u8]) -> u32 {
    frame_crc_update(FRAME_CRC_INIT, data)
}

/// Continues a frame CRC computation from a previous register value.
pub fn frame_crc_update(mut crc: u32, data: &[u8]) -> u32 {
    for &byte in data {
        let idx = ((crc >> 16) as u8) ^ byte;
        crc = ((crc << 8) & FRAME_CRC_MASK) ^ FRAME_TABLE[idx as usize];
    }
    crc
}

/// Computes the 8-bit end-to-end CRC with a caller supplied initial value.
pub fn e2e_crc(data: &[u8], init: u8) -> u8 {
    data.iter()
        .fold(init, |crc, &byte| E2E_TABLE[(crc ^ byte) as usize])
}
