//! Control codes embedded at the start of dictionary snips. A snip is
//! either literal text or a control sequence telling the reconstructor
//! where the value really comes from. Codes live below 0x20 so they never
//! collide with field text; the dictionary word separator is 0x00.
//!
//! | code | meaning                                                   |
//! |------|-----------------------------------------------------------|
//! | 0x01 | LOOKUP: value is the next item of this context's local    |
//! | 0x02 | OTHER_LOOKUP: value is the next local item of another ctx |
//! | 0x03 | SELF_DELTA: value = this ctx's last value + delta         |
//! | 0x04 | OTHER_DELTA: value = another ctx's last value + delta     |
//! | 0x05 | REDIRECT: reconstruct from another context                |
//! | 0x06 | SPECIAL: data-type-specific handler follows               |
//! | 0x07 | COMPOUND: expansion template for a structured field       |
//! | 0x08 | DONT_STORE: literal, but do not update last_value         |
//!
//! Another context is referenced by its fingerprint encoded as 16 hex
//! digits (raw fingerprint bytes may contain the word separator).

use crate::fingerprint::Fingerprint;

pub const SEP: u8 = 0x00;
pub const LOOKUP: u8 = 0x01;
pub const OTHER_LOOKUP: u8 = 0x02;
pub const SELF_DELTA: u8 = 0x03;
pub const OTHER_DELTA: u8 = 0x04;
pub const REDIRECT: u8 = 0x05;
pub const SPECIAL: u8 = 0x06;
pub const COMPOUND: u8 = 0x07;
pub const DONT_STORE: u8 = 0x08;

/// Compound-template internal markers (also below 0x20)
pub const COMPOUND_PREFIX: u8 = 0x0e;
pub const COMPOUND_PREFIX_END: u8 = 0x0f;
/// Item separator placeholder for "no separator"
pub const COMPOUND_NO_SEP: u8 = 0x01;

/// [LOOKUP | len-as-text] - sequence contexts carry the byte length
#[must_use]
pub fn lookup_with_len(len: usize) -> Vec<u8> {
    let mut snip = vec![LOOKUP];
    let mut buf = itoa::Buffer::new();
    snip.extend_from_slice(buf.format(len).as_bytes());
    snip
}

/// [OTHER_LOOKUP | fp-hex] - take the next local item of `other`
#[must_use]
pub fn other_lookup(other: Fingerprint) -> Vec<u8> {
    let mut snip = vec![OTHER_LOOKUP];
    snip.extend_from_slice(&other.to_hex());
    snip
}

/// [SELF_DELTA | delta-as-text]
#[must_use]
pub fn self_delta(delta: i64) -> Vec<u8> {
    let mut snip = vec![SELF_DELTA];
    let mut buf = itoa::Buffer::new();
    snip.extend_from_slice(buf.format(delta).as_bytes());
    snip
}

/// [OTHER_DELTA | fp-hex | delta-as-text] - delta against another context's
/// stored value, updating that context's value with the result
#[must_use]
pub fn other_delta(other: Fingerprint, delta: i64) -> Vec<u8> {
    let mut snip = vec![OTHER_DELTA];
    snip.extend_from_slice(&other.to_hex());
    let mut buf = itoa::Buffer::new();
    snip.extend_from_slice(buf.format(delta).as_bytes());
    snip
}

/// [REDIRECT | fp-hex] - reconstruct from another context entirely
#[must_use]
pub fn redirect(other: Fingerprint) -> Vec<u8> {
    let mut snip = vec![REDIRECT];
    snip.extend_from_slice(&other.to_hex());
    snip
}

/// [SPECIAL | handler-index | payload]
#[must_use]
pub fn special(handler: u8, payload: &[u8]) -> Vec<u8> {
    let mut snip = vec![SPECIAL, b'0' + handler];
    snip.extend_from_slice(payload);
    snip
}

/// Parse a 16-hex-digit fingerprint reference, returning it and the rest
pub fn read_fingerprint(snip: &[u8]) -> Option<(Fingerprint, &[u8])> {
    let fp = Fingerprint::from_hex(snip)?;
    Some((fp, &snip[16..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_delta_snip() {
        assert_eq!(self_delta(-7), vec![SELF_DELTA, b'-', b'7']);
    }

    #[test]
    fn test_other_lookup_roundtrip() {
        let fp = Fingerprint::primary(b"POS");
        let snip = other_lookup(fp);
        assert_eq!(snip[0], OTHER_LOOKUP);
        let (parsed, rest) = read_fingerprint(&snip[1..]).unwrap();
        assert_eq!(parsed, fp);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_special_snip() {
        let snip = special(2, b"1");
        assert_eq!(snip, vec![SPECIAL, b'2', b'1']);
    }

    #[test]
    fn test_codes_below_separator_range() {
        for code in [
            LOOKUP,
            OTHER_LOOKUP,
            SELF_DELTA,
            OTHER_DELTA,
            REDIRECT,
            SPECIAL,
            COMPOUND,
            DONT_STORE,
        ] {
            assert!(code > SEP && code < 0x20);
        }
    }
}
