//! The variable-length encoding used for word references into a context's
//! dictionary. Word indices 0..249 are one byte; larger indices use an
//! escape byte followed by a little-endian integer. The high byte values
//! are reserved codes:
//!
//! | byte | meaning                                             |
//! |------|-----------------------------------------------------|
//! | 0..=249 | literal word index (1 byte)                      |
//! | 250  | ONE_UP: previous word index + 1                     |
//! | 251  | EMPTY: subfield present but empty ("AC=")           |
//! | 252  | MISSING: subfield absent from this row              |
//! | 253  | escape: u16 LE word index follows (3 bytes total)   |
//! | 254  | escape: u32 LE word index follows (5 bytes total)   |
//! | 255  | reserved - never written                            |
//!
//! A reference is therefore 1 to 5 bytes. Word indices are capped at 2^31;
//! more distinct words in one context is a fatal error upstream.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{ReconError, Result};

pub const ONE_UP: u8 = 250;
pub const EMPTY: u8 = 251;
pub const MISSING: u8 = 252;
const ESC_U16: u8 = 253;
const ESC_U32: u8 = 254;

/// Largest encodable word index
pub const MAX_WORD_INDEX: u32 = (1 << 31) - 1;

/// One decoded b250 element
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum B250 {
    Index(u32),
    OneUp,
    Empty,
    Missing,
}

/// Append the encoding of `index` to `out`, applying the one-up shortcut
/// when permitted. `prev` is the previously encoded index (or None at the
/// start of the stream).
pub fn encode(index: u32, prev: Option<u32>, allow_one_up: bool, out: &mut Vec<u8>) {
    debug_assert!(index <= MAX_WORD_INDEX);
    if allow_one_up && prev.is_some_and(|p| index == p.wrapping_add(1)) {
        out.push(ONE_UP);
    } else if index < 250 {
        out.push(index as u8);
    } else if index <= u16::MAX as u32 {
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, index as u16);
        out.push(ESC_U16);
        out.extend_from_slice(&buf);
    } else {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, index);
        out.push(ESC_U32);
        out.extend_from_slice(&buf);
    }
}

/// Append one of the reserved codes
pub fn encode_code(code: u8, out: &mut Vec<u8>) {
    debug_assert!(code == EMPTY || code == MISSING);
    out.push(code);
}

/// Decode the next element, advancing `pos`. Returns an error on a
/// truncated stream or the reserved byte 255.
pub fn decode(data: &[u8], pos: &mut usize, vblock_i: u32, ctx: &str) -> Result<B250> {
    let overrun = || ReconError::B250Overrun {
        vblock_i,
        ctx: ctx.to_string(),
    };
    let b = *data.get(*pos).ok_or_else(overrun)?;
    *pos += 1;
    match b {
        0..=249 => Ok(B250::Index(b as u32)),
        ONE_UP => Ok(B250::OneUp),
        EMPTY => Ok(B250::Empty),
        MISSING => Ok(B250::Missing),
        ESC_U16 => {
            let end = *pos + 2;
            let bytes = data.get(*pos..end).ok_or_else(overrun)?;
            *pos = end;
            Ok(B250::Index(LittleEndian::read_u16(bytes) as u32))
        }
        ESC_U32 => {
            let end = *pos + 4;
            let bytes = data.get(*pos..end).ok_or_else(overrun)?;
            *pos = end;
            Ok(B250::Index(LittleEndian::read_u32(bytes)))
        }
        _ => Err(ReconError::BadControlSnip {
            vblock_i,
            ctx: ctx.to_string(),
            code: b,
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(indices: &[u32], allow_one_up: bool) -> Vec<B250> {
        let mut data = Vec::new();
        let mut prev = None;
        for &i in indices {
            encode(i, prev, allow_one_up, &mut data);
            prev = Some(i);
        }
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            out.push(decode(&data, &mut pos, 1, "TEST").unwrap());
        }
        out
    }

    #[test]
    fn test_one_byte_form() {
        let mut data = Vec::new();
        encode(0, None, true, &mut data);
        encode(249, Some(0), false, &mut data);
        assert_eq!(data, vec![0, 249]);
    }

    #[test]
    fn test_escape_forms() {
        let mut data = Vec::new();
        encode(250, None, false, &mut data);
        assert_eq!(data.len(), 3);
        encode(70_000, None, false, &mut data);
        assert_eq!(data.len(), 8);

        let mut pos = 0;
        assert_eq!(decode(&data, &mut pos, 1, "T").unwrap(), B250::Index(250));
        assert_eq!(decode(&data, &mut pos, 1, "T").unwrap(), B250::Index(70_000));
    }

    #[test]
    fn test_one_up_shortcut() {
        let decoded = roundtrip(&[5, 6, 7, 3], true);
        assert_eq!(
            decoded,
            vec![B250::Index(5), B250::OneUp, B250::OneUp, B250::Index(3)]
        );
    }

    #[test]
    fn test_one_up_disabled() {
        let decoded = roundtrip(&[5, 6, 7], false);
        assert_eq!(
            decoded,
            vec![B250::Index(5), B250::Index(6), B250::Index(7)]
        );
    }

    #[test]
    fn test_one_up_never_fires_on_first() {
        let decoded = roundtrip(&[1], true);
        assert_eq!(decoded, vec![B250::Index(1)]);
    }

    #[test]
    fn test_reserved_codes() {
        let mut data = Vec::new();
        encode_code(EMPTY, &mut data);
        encode_code(MISSING, &mut data);
        let mut pos = 0;
        assert_eq!(decode(&data, &mut pos, 1, "T").unwrap(), B250::Empty);
        assert_eq!(decode(&data, &mut pos, 1, "T").unwrap(), B250::Missing);
    }

    #[test]
    fn test_truncated_stream() {
        let data = vec![ESC_U32, 1, 2];
        let mut pos = 0;
        assert!(decode(&data, &mut pos, 1, "T").is_err());
    }

    #[test]
    fn test_invalid_byte() {
        let data = vec![255];
        let mut pos = 0;
        assert!(decode(&data, &mut pos, 1, "T").is_err());
    }
}
