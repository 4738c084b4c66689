//! Bit-exact serialization of the typed sections an archive is made of.
//! Every persisted unit starts with the same fixed 26-byte header:
//!
//! ```text
//! magic:u32 | section_type:u16 | flags:u16 |
//! comp_len:u32 | uncomp_len:u32 | codec:u8 | reserved:u8 |
//! vblock_i:u32 | section_i:u16 | reserved2:u16
//! ```
//!
//! followed by a type-specific sub-header in the clear, followed by the
//! payload (compressed by `codec`, then encrypted if the archive has a
//! password). All integers are little-endian; header structs use byte-array
//! fields so the in-memory layout is exactly the wire layout with no
//! padding. Sections are appended with no alignment; their offsets are
//! recorded in the footer's section list. The file ends with the footer
//! section whose offset sits in the last 8 bytes of the file.

use byteorder::{ByteOrder, LittleEndian};
use bytemuck::{Pod, Zeroable};

use crate::codec::{self, Codec};
use crate::crypt::SectionCipher;
use crate::error::{HeaderError, Result};
use crate::fingerprint::Fingerprint;

pub const SECTION_MAGIC: u32 = u32::from_le_bytes(*b"SQZB");

/// Section flag: payload is encrypted
pub const SEC_FLAG_ENCRYPTED: u16 = 1 << 0;

pub const SECTION_HEADER_LEN: usize = std::mem::size_of::<SectionHeader>();

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum SectionType {
    FileHeader = 0,
    TxtHeader = 1,
    VbHeader = 2,
    B250 = 3,
    Local = 4,
    Dict = 5,
    RandomAccess = 6,
    Footer = 7,
}

impl SectionType {
    pub fn from_tag(tag: u16) -> Result<Self> {
        match tag {
            0 => Ok(SectionType::FileHeader),
            1 => Ok(SectionType::TxtHeader),
            2 => Ok(SectionType::VbHeader),
            3 => Ok(SectionType::B250),
            4 => Ok(SectionType::Local),
            5 => Ok(SectionType::Dict),
            6 => Ok(SectionType::RandomAccess),
            7 => Ok(SectionType::Footer),
            _ => Err(HeaderError::UnknownSectionType(tag).into()),
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            SectionType::FileHeader => "file-header",
            SectionType::TxtHeader => "txt-header",
            SectionType::VbHeader => "vb-header",
            SectionType::B250 => "b250",
            SectionType::Local => "local",
            SectionType::Dict => "dict",
            SectionType::RandomAccess => "random-access",
            SectionType::Footer => "footer",
        }
    }

    /// Length of the type-specific sub-header that follows the fixed header
    #[must_use]
    pub fn sub_header_len(self) -> usize {
        match self {
            SectionType::VbHeader => std::mem::size_of::<VbSubHeader>(),
            SectionType::B250 | SectionType::Local | SectionType::Dict => {
                std::mem::size_of::<CtxSubHeader>()
            }
            SectionType::TxtHeader => std::mem::size_of::<TxtSubHeader>(),
            _ => 0,
        }
    }
}

#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct SectionHeader {
    magic: [u8; 4],
    section_type: [u8; 2],
    flags: [u8; 2],
    comp_len: [u8; 4],
    uncomp_len: [u8; 4],
    codec: u8,
    reserved: u8,
    vblock_i: [u8; 4],
    section_i: [u8; 2],
    reserved2: [u8; 2],
}

impl SectionHeader {
    #[allow(clippy::too_many_arguments)]
    fn new(
        section_type: SectionType,
        flags: u16,
        comp_len: u32,
        uncomp_len: u32,
        codec: Codec,
        vblock_i: u32,
        section_i: u16,
    ) -> Self {
        let mut h = SectionHeader::zeroed();
        LittleEndian::write_u32(&mut h.magic, SECTION_MAGIC);
        LittleEndian::write_u16(&mut h.section_type, section_type as u16);
        LittleEndian::write_u16(&mut h.flags, flags);
        LittleEndian::write_u32(&mut h.comp_len, comp_len);
        LittleEndian::write_u32(&mut h.uncomp_len, uncomp_len);
        h.codec = codec.tag();
        LittleEndian::write_u32(&mut h.vblock_i, vblock_i);
        LittleEndian::write_u16(&mut h.section_i, section_i);
        h
    }

    pub fn section_type(&self) -> Result<SectionType> {
        SectionType::from_tag(LittleEndian::read_u16(&self.section_type))
    }

    #[must_use]
    pub fn flags(&self) -> u16 {
        LittleEndian::read_u16(&self.flags)
    }

    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.flags() & SEC_FLAG_ENCRYPTED != 0
    }

    #[must_use]
    pub fn comp_len(&self) -> u32 {
        LittleEndian::read_u32(&self.comp_len)
    }

    #[must_use]
    pub fn uncomp_len(&self) -> u32 {
        LittleEndian::read_u32(&self.uncomp_len)
    }

    pub fn codec(&self) -> Result<Codec> {
        Codec::from_tag(self.codec)
    }

    #[must_use]
    pub fn vblock_i(&self) -> u32 {
        LittleEndian::read_u32(&self.vblock_i)
    }

    #[must_use]
    pub fn section_i(&self) -> u16 {
        LittleEndian::read_u16(&self.section_i)
    }
}

/// Sub-header of b250, local and dictionary sections
#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct CtxSubHeader {
    pub fingerprint: Fingerprint,
    pub ltype: u8,
    pub ctx_flags: u8,
    num_words: [u8; 4],
    reserved: [u8; 2],
}

impl CtxSubHeader {
    #[must_use]
    pub fn new(fingerprint: Fingerprint, ltype: u8, ctx_flags: u8, num_words: u32) -> Self {
        let mut h = CtxSubHeader::zeroed();
        h.fingerprint = fingerprint;
        h.ltype = ltype;
        h.ctx_flags = ctx_flags;
        LittleEndian::write_u32(&mut h.num_words, num_words);
        h
    }

    #[must_use]
    pub fn num_words(&self) -> u32 {
        LittleEndian::read_u32(&self.num_words)
    }
}

/// Sub-header of the per-block VB-header section
#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct VbSubHeader {
    num_lines: [u8; 4],
    txt_len: [u8; 8],
    first_line: [u8; 8],
    longest_line: [u8; 4],
    num_ctx_sections: [u8; 4],
}

impl VbSubHeader {
    #[must_use]
    pub fn new(
        num_lines: u32,
        txt_len: u64,
        first_line: u64,
        longest_line: u32,
        num_ctx_sections: u32,
    ) -> Self {
        let mut h = VbSubHeader::zeroed();
        LittleEndian::write_u32(&mut h.num_lines, num_lines);
        LittleEndian::write_u64(&mut h.txt_len, txt_len);
        LittleEndian::write_u64(&mut h.first_line, first_line);
        LittleEndian::write_u32(&mut h.longest_line, longest_line);
        LittleEndian::write_u32(&mut h.num_ctx_sections, num_ctx_sections);
        h
    }

    #[must_use]
    pub fn num_lines(&self) -> u32 {
        LittleEndian::read_u32(&self.num_lines)
    }
    #[must_use]
    pub fn txt_len(&self) -> u64 {
        LittleEndian::read_u64(&self.txt_len)
    }
    #[must_use]
    pub fn first_line(&self) -> u64 {
        LittleEndian::read_u64(&self.first_line)
    }
    #[must_use]
    pub fn longest_line(&self) -> u32 {
        LittleEndian::read_u32(&self.longest_line)
    }
    #[must_use]
    pub fn num_ctx_sections(&self) -> u32 {
        LittleEndian::read_u32(&self.num_ctx_sections)
    }
}

/// Sub-header of a component's text-header section
#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct TxtSubHeader {
    num_header_lines: [u8; 4],
    reserved: [u8; 4],
}

impl TxtSubHeader {
    #[must_use]
    pub fn new(num_header_lines: u32) -> Self {
        let mut h = TxtSubHeader::zeroed();
        LittleEndian::write_u32(&mut h.num_header_lines, num_header_lines);
        h
    }

    #[must_use]
    pub fn num_header_lines(&self) -> u32 {
        LittleEndian::read_u32(&self.num_header_lines)
    }
}

/// One entry of the footer's section list
#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct SectionEntry {
    offset: [u8; 8],
    vblock_i: [u8; 4],
    section_type_tag: u8,
    reserved: u8,
    section_i: [u8; 2],
    pub fingerprint: Fingerprint,
}

impl SectionEntry {
    #[must_use]
    pub fn new(
        offset: u64,
        vblock_i: u32,
        section_type: SectionType,
        section_i: u16,
        fingerprint: Fingerprint,
    ) -> Self {
        let mut e = SectionEntry::zeroed();
        LittleEndian::write_u64(&mut e.offset, offset);
        LittleEndian::write_u32(&mut e.vblock_i, vblock_i);
        e.section_type_tag = section_type as u16 as u8;
        LittleEndian::write_u16(&mut e.section_i, section_i);
        e.fingerprint = fingerprint;
        e
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        LittleEndian::read_u64(&self.offset)
    }
    #[must_use]
    pub fn vblock_i(&self) -> u32 {
        LittleEndian::read_u32(&self.vblock_i)
    }
    pub fn section_type(&self) -> Result<SectionType> {
        SectionType::from_tag(self.section_type_tag as u16)
    }
}

/// Section writing context: the optional cipher and the coordinates the
/// nonce is derived from.
pub struct SectionCoords<'a> {
    pub cipher: Option<&'a SectionCipher>,
    pub vblock_i: u32,
    pub section_i: u16,
}

/// Serialize one section (header, sub-header, compressed payload) and
/// append it to `dst`. The payload is supplied as parts so per-line spans
/// compress without an intermediate copy.
pub fn emit_section_iter<'p>(
    dst: &mut Vec<u8>,
    section_type: SectionType,
    sub_header: &[u8],
    payload_parts: impl Iterator<Item = &'p [u8]>,
    codec: Codec,
    coords: &SectionCoords<'_>,
) -> Result<()> {
    debug_assert_eq!(sub_header.len(), section_type.sub_header_len());

    let mut z_payload = Vec::new();
    let uncomp_len = codec::compress_iter(codec, payload_parts, &mut z_payload)?;

    let mut flags = 0u16;
    // the file header stays in the clear so the decoder can read the salt
    if section_type != SectionType::FileHeader {
        if let Some(cipher) = coords.cipher {
            z_payload = cipher.encrypt(
                section_type as u16,
                coords.vblock_i,
                coords.section_i,
                &z_payload,
            )?;
            flags |= SEC_FLAG_ENCRYPTED;
        }
    }

    let header = SectionHeader::new(
        section_type,
        flags,
        z_payload.len() as u32,
        uncomp_len as u32,
        codec,
        coords.vblock_i,
        coords.section_i,
    );
    dst.extend_from_slice(bytemuck::bytes_of(&header));
    dst.extend_from_slice(sub_header);
    dst.extend_from_slice(&z_payload);
    Ok(())
}

pub fn emit_section(
    dst: &mut Vec<u8>,
    section_type: SectionType,
    sub_header: &[u8],
    payload: &[u8],
    codec: Codec,
    coords: &SectionCoords<'_>,
) -> Result<()> {
    emit_section_iter(
        dst,
        section_type,
        sub_header,
        std::iter::once(payload),
        codec,
        coords,
    )
}

/// A parsed section pointing into the archive bytes
pub struct SectionRef<'a> {
    pub header: SectionHeader,
    pub sub_header: &'a [u8],
    payload: &'a [u8],
    /// Offset of the byte following this section
    pub end: u64,
}

impl<'a> SectionRef<'a> {
    /// Parse the section starting at `offset` in `data`
    pub fn read(data: &'a [u8], offset: u64) -> Result<Self> {
        let start = offset as usize;
        let head_end = start + SECTION_HEADER_LEN;
        let head_bytes = data
            .get(start..head_end)
            .ok_or(HeaderError::UnexpectedEof {
                expected: "section header",
                offset,
            })?;
        let header: SectionHeader = *bytemuck::from_bytes(head_bytes);
        if LittleEndian::read_u32(&header.magic) != SECTION_MAGIC {
            return Err(HeaderError::InvalidSectionMagic {
                found: LittleEndian::read_u32(&header.magic),
                offset,
            }
            .into());
        }
        let section_type = header.section_type()?;
        let sub_end = head_end + section_type.sub_header_len();
        let payload_end = sub_end + header.comp_len() as usize;
        let sub_header = data.get(head_end..sub_end).ok_or(HeaderError::UnexpectedEof {
            expected: "section sub-header",
            offset,
        })?;
        let payload = data.get(sub_end..payload_end).ok_or(HeaderError::UnexpectedEof {
            expected: "section payload",
            offset,
        })?;
        Ok(SectionRef {
            header,
            sub_header,
            payload,
            end: payload_end as u64,
        })
    }

    pub fn expect_type(&self, expected: SectionType) -> Result<()> {
        let found = self.header.section_type()?;
        if found != expected {
            return Err(HeaderError::SectionTypeMismatch {
                expected: expected.name(),
                found: found.name(),
            }
            .into());
        }
        Ok(())
    }

    pub fn ctx_sub_header(&self) -> CtxSubHeader {
        *bytemuck::from_bytes(self.sub_header)
    }

    pub fn vb_sub_header(&self) -> VbSubHeader {
        *bytemuck::from_bytes(self.sub_header)
    }

    pub fn txt_sub_header(&self) -> TxtSubHeader {
        *bytemuck::from_bytes(self.sub_header)
    }

    /// Decrypt (if needed) and decompress the payload into `dst`.
    /// `first_section` selects the wrong-password diagnosis when the
    /// archive cipher fails its self test.
    pub fn decode_payload(
        &self,
        cipher: Option<&SectionCipher>,
        first_section: bool,
        dst: &mut Vec<u8>,
    ) -> Result<()> {
        let section_type = self.header.section_type()?;
        let plain_z;
        let z_bytes: &[u8] = if self.header.is_encrypted() {
            let cipher = cipher.ok_or(crate::error::CryptError::PasswordRequired)?;
            plain_z = cipher.decrypt(
                section_type as u16,
                self.header.vblock_i(),
                self.header.section_i(),
                self.payload,
                first_section,
            )?;
            &plain_z
        } else {
            self.payload
        };
        codec::decompress(
            self.header.codec()?,
            z_bytes,
            self.header.uncomp_len() as usize,
            dst,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_26_bytes() {
        assert_eq!(SECTION_HEADER_LEN, 26);
    }

    #[test]
    fn test_emit_and_read_roundtrip() {
        let mut dst = Vec::new();
        let coords = SectionCoords {
            cipher: None,
            vblock_i: 3,
            section_i: 2,
        };
        let sub = CtxSubHeader::new(Fingerprint::primary(b"CHROM"), 0, 0, 5);
        emit_section(
            &mut dst,
            SectionType::B250,
            bytemuck::bytes_of(&sub),
            b"some payload bytes some payload bytes",
            Codec::Zstd,
            &coords,
        )
        .unwrap();

        let sec = SectionRef::read(&dst, 0).unwrap();
        sec.expect_type(SectionType::B250).unwrap();
        assert_eq!(sec.header.vblock_i(), 3);
        assert_eq!(sec.header.section_i(), 2);
        assert_eq!(sec.ctx_sub_header().num_words(), 5);
        assert_eq!(
            sec.ctx_sub_header().fingerprint,
            Fingerprint::primary(b"CHROM")
        );
        assert_eq!(sec.end, dst.len() as u64);

        let mut payload = Vec::new();
        sec.decode_payload(None, false, &mut payload).unwrap();
        assert_eq!(payload, b"some payload bytes some payload bytes");
    }

    #[test]
    fn test_encrypted_roundtrip() {
        let cipher = SectionCipher::new("pw", &[1u8; 16]);
        let mut dst = Vec::new();
        let coords = SectionCoords {
            cipher: Some(&cipher),
            vblock_i: 1,
            section_i: 0,
        };
        emit_section(
            &mut dst,
            SectionType::Local,
            bytemuck::bytes_of(&CtxSubHeader::new(Fingerprint::primary(b"SEQ"), 2, 0, 0)),
            b"ACGTACGTACGT",
            Codec::Stored,
            &coords,
        )
        .unwrap();

        let sec = SectionRef::read(&dst, 0).unwrap();
        assert!(sec.header.is_encrypted());

        // without the cipher: password required
        let mut payload = Vec::new();
        assert!(sec.decode_payload(None, true, &mut payload).is_err());

        // wrong password: detected on the first section
        let wrong = SectionCipher::new("other", &[1u8; 16]);
        let err = sec
            .decode_payload(Some(&wrong), true, &mut payload)
            .unwrap_err();
        assert!(format!("{err}").contains("Wrong password"));

        // right password
        sec.decode_payload(Some(&cipher), true, &mut payload).unwrap();
        assert_eq!(payload, b"ACGTACGTACGT");
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut dst = Vec::new();
        emit_section(
            &mut dst,
            SectionType::RandomAccess,
            &[],
            b"",
            Codec::Stored,
            &SectionCoords {
                cipher: None,
                vblock_i: 0,
                section_i: 0,
            },
        )
        .unwrap();
        dst[0] ^= 0xff;
        assert!(SectionRef::read(&dst, 0).is_err());
    }

    #[test]
    fn test_truncated_section_rejected() {
        let mut dst = Vec::new();
        emit_section(
            &mut dst,
            SectionType::Dict,
            bytemuck::bytes_of(&CtxSubHeader::new(Fingerprint::primary(b"ID"), 0, 0, 1)),
            b"rs123",
            Codec::Stored,
            &SectionCoords {
                cipher: None,
                vblock_i: 0,
                section_i: 0,
            },
        )
        .unwrap();
        dst.truncate(dst.len() - 1);
        assert!(SectionRef::read(&dst, 0).is_err());
    }
}
