use bytemuck::{Pod, Zeroable};

/// Length of a fingerprint in bytes
pub const FINGERPRINT_LEN: usize = 8;

/// An opaque 8-byte identifier for one logical field, derived from a short
/// name (up to 8 bytes, case-preserving, zero-padded). The two most
/// significant bits of the first byte encode the field category:
///
/// | bits | category                                    |
/// |------|---------------------------------------------|
/// | `00` | primary field (CHROM, POS, SEQ, ...)        |
/// | `11` | type-1 subfield (name=value style, eg INFO) |
/// | `01` | type-2 subfield (compound template items)   |
///
/// Names start with an ASCII letter, so the natural two MSBs of the first
/// byte are `01` - type-2 names are stored unchanged, primary fields clear
/// the bits, type-1 subfields set both. Fingerprints are stable across
/// files and are used as map keys and in section sub-headers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct Fingerprint(pub [u8; FINGERPRINT_LEN]);

/// Field category encoded in the two MSBs of the first fingerprint byte
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
    Primary,
    Type1,
    Type2,
}

impl Fingerprint {
    pub const NONE: Fingerprint = Fingerprint([0; FINGERPRINT_LEN]);

    fn make(name: &[u8]) -> [u8; FINGERPRINT_LEN] {
        debug_assert!(!name.is_empty());
        let mut id = [0u8; FINGERPRINT_LEN];
        let n = name.len().min(FINGERPRINT_LEN);
        id[..n].copy_from_slice(&name[..n]);
        // overlong names keep their first 7 bytes and fold the tail into the
        // last byte so that distinct long names remain distinct in practice
        if name.len() > FINGERPRINT_LEN {
            let mut acc = id[FINGERPRINT_LEN - 1];
            for &b in &name[FINGERPRINT_LEN..] {
                acc = acc.wrapping_mul(31).wrapping_add(b);
            }
            id[FINGERPRINT_LEN - 1] = acc;
        }
        id
    }

    /// Fingerprint of a primary field: two MSBs of byte 0 cleared to `00`
    pub fn primary(name: &[u8]) -> Self {
        let mut id = Self::make(name);
        id[0] &= 0x3f;
        Fingerprint(id)
    }

    /// Fingerprint of a type-1 subfield: two MSBs of byte 0 set to `11`
    pub fn type1(name: &[u8]) -> Self {
        let mut id = Self::make(name);
        id[0] |= 0xc0;
        Fingerprint(id)
    }

    /// Fingerprint of a type-2 subfield: byte 0 unchanged (names begin with
    /// an ASCII letter, whose two MSBs are already `01`)
    pub fn type2(name: &[u8]) -> Self {
        Fingerprint(Self::make(name))
    }

    #[must_use]
    pub fn is_none(self) -> bool {
        self.num() == 0
    }

    /// The fingerprint as a stable integer key
    #[must_use]
    pub fn num(self) -> u64 {
        u64::from_le_bytes(self.0)
    }

    #[must_use]
    pub fn category(self) -> Category {
        match self.0[0] >> 6 {
            0 => Category::Primary,
            3 => Category::Type1,
            _ => Category::Type2,
        }
    }

    /// The display form: restores `01` on byte 0 so the name reads back as
    /// the original ASCII, regardless of category
    #[must_use]
    pub fn printable(self) -> String {
        let mut id = self.0;
        id[0] = (id[0] & 0x7f) | 0x40;
        let end = id.iter().position(|&b| b == 0).unwrap_or(FINGERPRINT_LEN);
        String::from_utf8_lossy(&id[..end]).into_owned()
    }

    /// 16 lowercase hex digits - used to embed a fingerprint inside a snip,
    /// where raw bytes could collide with the dictionary sentinel
    #[must_use]
    pub fn to_hex(self) -> [u8; 16] {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut out = [0u8; 16];
        for (i, &b) in self.0.iter().enumerate() {
            out[i * 2] = HEX[(b >> 4) as usize];
            out[i * 2 + 1] = HEX[(b & 0xf) as usize];
        }
        out
    }

    pub fn from_hex(hex: &[u8]) -> Option<Self> {
        if hex.len() < 16 {
            return None;
        }
        let mut id = [0u8; FINGERPRINT_LEN];
        for i in 0..FINGERPRINT_LEN {
            let hi = (hex[i * 2] as char).to_digit(16)?;
            let lo = (hex[i * 2 + 1] as char).to_digit(16)?;
            id[i] = ((hi << 4) | lo) as u8;
        }
        Some(Fingerprint(id))
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint({})", self.printable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_category() {
        let fp = Fingerprint::primary(b"CHROM");
        assert_eq!(fp.category(), Category::Primary);
        assert_eq!(fp.printable(), "CHROM");
    }

    #[test]
    fn test_type1_category() {
        let fp = Fingerprint::type1(b"AC");
        assert_eq!(fp.category(), Category::Type1);
        assert_eq!(fp.printable(), "AC");
    }

    #[test]
    fn test_type2_category() {
        let fp = Fingerprint::type2(b"D0ESC");
        assert_eq!(fp.category(), Category::Type2);
        assert_eq!(fp.printable(), "D0ESC");
    }

    #[test]
    fn test_categories_do_not_collide() {
        let a = Fingerprint::primary(b"END");
        let b = Fingerprint::type1(b"END");
        assert_ne!(a.num(), b.num());
        assert_eq!(a.printable(), b.printable());
    }

    #[test]
    fn test_case_preserved() {
        let lower = Fingerprint::type1(b"mc");
        let upper = Fingerprint::type1(b"MC");
        assert_ne!(lower.num(), upper.num());
    }

    #[test]
    fn test_zero_padding_stable() {
        let fp1 = Fingerprint::primary(b"POS");
        let fp2 = Fingerprint::primary(b"POS");
        assert_eq!(fp1, fp2);
        assert_eq!(fp1.0[3..], [0u8; 5]);
    }

    #[test]
    fn test_overlong_names_distinct() {
        let a = Fingerprint::type1(b"ancestral_allele");
        let b = Fingerprint::type1(b"ancestral_axlele");
        assert_ne!(a.num(), b.num());
    }

    #[test]
    fn test_hex_roundtrip() {
        let fp = Fingerprint::type1(b"VQSLOD");
        let hex = fp.to_hex();
        assert_eq!(Fingerprint::from_hex(&hex), Some(fp));
    }
}
