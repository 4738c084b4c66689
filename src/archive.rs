//! The output-side archive manager: file-header section, running section
//! list, component table, dictionary/random-access/footer epilogue, and
//! the concatenation compatibility gate. All writes happen on the I/O
//! thread; workers only serialize into their block-private buffers.

use byteorder::{ByteOrder, LittleEndian};
use bytemuck::{Pod, Zeroable};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::codec::Codec;
use crate::context::CtxPool;
use crate::crypt::{SectionCipher, SALT_LEN};
use crate::digest::DigestBytes;
use crate::error::{HeaderError, Result};
use crate::fingerprint::Fingerprint;
use crate::random_access::RaBuf;
use crate::section::{
    emit_section, SectionCoords, SectionEntry, SectionRef, SectionType, TxtSubHeader,
};
use crate::types::DataType;

pub const FORMAT_VERSION: u8 = 1;

/// Payload of the file-header section, written first and never encrypted
/// (the decoder needs the salt and flags before it can decrypt anything)
#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct FileHeaderData {
    pub version: u8,
    pub data_type_tag: u8,
    pub encrypted: u8,
    /// Numeric rounding was applied: digests describe the source file and
    /// are not compared against the reconstruction
    pub optimized: u8,
    block_size: [u8; 8],
    pub salt: [u8; SALT_LEN],
}

impl FileHeaderData {
    #[must_use]
    pub fn new(
        data_type: DataType,
        encrypted: bool,
        optimized: bool,
        block_size: u64,
        salt: [u8; SALT_LEN],
    ) -> Self {
        let mut h = FileHeaderData::zeroed();
        h.version = FORMAT_VERSION;
        h.data_type_tag = data_type.tag();
        h.encrypted = encrypted as u8;
        h.optimized = optimized as u8;
        LittleEndian::write_u64(&mut h.block_size, block_size);
        h.salt = salt;
        h
    }

    #[must_use]
    pub fn block_size(&self) -> u64 {
        LittleEndian::read_u64(&self.block_size)
    }
}

/// Fixed head of the footer payload, followed by the component table and
/// the section list
#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct FooterData {
    pub version: u8,
    pub data_type_tag: u8,
    pub encrypted: u8,
    reserved: u8,
    num_components: [u8; 4],
    num_vblocks: [u8; 4],
    num_sections: [u8; 4],
    txt_len: [u8; 8],
    pub digest_concat: DigestBytes,
}

impl FooterData {
    #[must_use]
    pub fn num_components(&self) -> u32 {
        LittleEndian::read_u32(&self.num_components)
    }
    #[must_use]
    pub fn num_vblocks(&self) -> u32 {
        LittleEndian::read_u32(&self.num_vblocks)
    }
    #[must_use]
    pub fn num_sections(&self) -> u32 {
        LittleEndian::read_u32(&self.num_sections)
    }
    #[must_use]
    pub fn txt_len(&self) -> u64 {
        LittleEndian::read_u64(&self.txt_len)
    }
}

/// One component (input file) in the footer's component table
#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct ComponentEntry {
    txt_header_section: [u8; 4],
    num_vblocks: [u8; 4],
    txt_len: [u8; 8],
    num_rows: [u8; 8],
    pub digest: DigestBytes,
}

impl ComponentEntry {
    #[must_use]
    pub fn txt_header_section(&self) -> u32 {
        LittleEndian::read_u32(&self.txt_header_section)
    }
    #[must_use]
    pub fn num_vblocks(&self) -> u32 {
        LittleEndian::read_u32(&self.num_vblocks)
    }
    #[must_use]
    pub fn txt_len(&self) -> u64 {
        LittleEndian::read_u64(&self.txt_len)
    }
    #[must_use]
    pub fn num_rows(&self) -> u64 {
        LittleEndian::read_u64(&self.num_rows)
    }
}

/// State shared with the worker pool during compression
pub struct ZipShared {
    pub pool: CtxPool,
    pub ra: RaBuf,
    pub cipher: Option<SectionCipher>,
}

/// The archive file being written. Owned by the I/O thread.
pub struct ArchiveWriter {
    file: fs::File,
    pub path: PathBuf,
    offset: u64,
    sections: Vec<SectionEntry>,
    components: Vec<ComponentEntry>,
    /// Section counter for sections outside any block (vblock_i = 0)
    global_section_i: u16,
    data_type: DataType,
    encrypted: bool,
    pub num_vblocks: u32,
    pub txt_len: u64,
    /// Text header of the first component, for concatenation checks
    first_txt_header: Option<Vec<u8>>,
    current_component_first_vb: u32,
    current_component_header_section: u32,
}

impl ArchiveWriter {
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        path: &Path,
        data_type: DataType,
        block_size: u64,
        salt: [u8; SALT_LEN],
        encrypted: bool,
        optimized: bool,
        cipher: Option<&SectionCipher>,
    ) -> Result<Self> {
        let file = fs::File::create(path)?;
        let mut writer = ArchiveWriter {
            file,
            path: path.to_path_buf(),
            offset: 0,
            sections: Vec::new(),
            components: Vec::new(),
            global_section_i: 0,
            data_type,
            encrypted,
            num_vblocks: 0,
            txt_len: 0,
            first_txt_header: None,
            current_component_first_vb: 1,
            current_component_header_section: 0,
        };
        let header = FileHeaderData::new(data_type, encrypted, optimized, block_size, salt);
        writer.write_global_section(
            SectionType::FileHeader,
            &[],
            bytemuck::bytes_of(&header),
            Codec::Stored,
            cipher,
            Fingerprint::NONE,
        )?;
        Ok(writer)
    }

    /// Write one section outside any block and record it in the list
    pub fn write_global_section(
        &mut self,
        section_type: SectionType,
        sub_header: &[u8],
        payload: &[u8],
        codec: Codec,
        cipher: Option<&SectionCipher>,
        fingerprint: Fingerprint,
    ) -> Result<()> {
        if self.encrypted && self.global_section_i == u16::MAX {
            return Err(std::io::Error::other(
                "too many global sections for one encrypted archive",
            )
            .into());
        }
        let mut bytes = Vec::new();
        let coords = SectionCoords {
            cipher,
            vblock_i: 0,
            section_i: self.global_section_i,
        };
        emit_section(&mut bytes, section_type, sub_header, payload, codec, &coords)?;
        self.sections.push(SectionEntry::new(
            self.offset,
            0,
            section_type,
            self.global_section_i,
            fingerprint,
        ));
        self.global_section_i = self.global_section_i.wrapping_add(1);
        self.file.write_all(&bytes)?;
        self.offset += bytes.len() as u64;
        Ok(())
    }

    /// Open a component: verify concatenation compatibility and persist
    /// its text header
    pub fn begin_component(
        &mut self,
        src_path: &Path,
        header: &[u8],
        cipher: Option<&SectionCipher>,
    ) -> Result<()> {
        if let Some(first) = &self.first_txt_header {
            let check = (self.data_type.def().concat_check)(first, header);
            if let Err(reason) = check {
                return Err(HeaderError::IncompatibleComponent {
                    path: src_path.to_path_buf(),
                    reason,
                }
                .into());
            }
        } else {
            self.first_txt_header = Some(header.to_vec());
        }
        let num_lines = memchr::memchr_iter(b'\n', header).count() as u32;
        let sub = TxtSubHeader::new(num_lines);
        self.current_component_header_section = self.sections.len() as u32;
        self.current_component_first_vb = self.num_vblocks + 1;
        self.write_global_section(
            SectionType::TxtHeader,
            bytemuck::bytes_of(&sub),
            header,
            Codec::Zstd,
            cipher,
            Fingerprint::NONE,
        )?;
        self.txt_len += header.len() as u64;
        Ok(())
    }

    /// Append a block's serialized sections, indexing each one
    pub fn write_vb(&mut self, z_data: &[u8], txt_len: u64) -> Result<()> {
        let mut at = 0u64;
        while at < z_data.len() as u64 {
            let sec = SectionRef::read(z_data, at)?;
            let section_type = sec.header.section_type()?;
            let fingerprint = match section_type {
                SectionType::B250 | SectionType::Local => sec.ctx_sub_header().fingerprint,
                _ => Fingerprint::NONE,
            };
            self.sections.push(SectionEntry::new(
                self.offset + at,
                sec.header.vblock_i(),
                section_type,
                sec.header.section_i(),
                fingerprint,
            ));
            at = sec.end;
        }
        self.file.write_all(z_data)?;
        self.offset += z_data.len() as u64;
        self.num_vblocks += 1;
        self.txt_len += txt_len;
        Ok(())
    }

    /// Write the dictionary fragments every context accumulated during
    /// this component
    pub fn write_component_dicts(
        &mut self,
        pool: &CtxPool,
        cipher: Option<&SectionCipher>,
    ) -> Result<()> {
        for zctx_i in pool.indices() {
            let zctx = pool.get(zctx_i);
            let mut z = zctx.write();
            let (bytes, num_words) = z.fragment();
            if num_words == 0 {
                continue;
            }
            let sub = crate::section::CtxSubHeader::new(z.fingerprint, 0, 0, num_words as u32);
            let fingerprint = z.fingerprint;
            let payload = bytes.to_vec();
            z.mark_persisted();
            drop(z);
            self.write_global_section(
                SectionType::Dict,
                bytemuck::bytes_of(&sub),
                &payload,
                Codec::pick_dict(payload.len()),
                cipher,
                fingerprint,
            )?;
        }
        Ok(())
    }

    /// Close the current component with its digest and counters
    pub fn end_component(&mut self, txt_len: u64, num_rows: u64, digest: DigestBytes) {
        let mut entry = ComponentEntry::zeroed();
        LittleEndian::write_u32(
            &mut entry.txt_header_section,
            self.current_component_header_section,
        );
        LittleEndian::write_u32(
            &mut entry.num_vblocks,
            self.num_vblocks + 1 - self.current_component_first_vb,
        );
        LittleEndian::write_u64(&mut entry.txt_len, txt_len);
        LittleEndian::write_u64(&mut entry.num_rows, num_rows);
        entry.digest = digest;
        self.components.push(entry);
    }

    /// Write the random-access section, the footer, and the trailing
    /// footer offset, then flush
    pub fn finish(
        mut self,
        ra: &RaBuf,
        digest_concat: DigestBytes,
        cipher: Option<&SectionCipher>,
    ) -> Result<()> {
        if !ra.is_empty() {
            let payload = ra.to_payload();
            self.write_global_section(
                SectionType::RandomAccess,
                &[],
                &payload,
                Codec::Zstd,
                cipher,
                Fingerprint::NONE,
            )?;
        }

        let footer_offset = self.offset;
        let mut footer = FooterData::zeroed();
        footer.version = FORMAT_VERSION;
        footer.data_type_tag = self.data_type.tag();
        footer.encrypted = self.encrypted as u8;
        LittleEndian::write_u32(&mut footer.num_components, self.components.len() as u32);
        LittleEndian::write_u32(&mut footer.num_vblocks, self.num_vblocks);
        // the footer section itself is in the list it carries
        LittleEndian::write_u32(&mut footer.num_sections, self.sections.len() as u32 + 1);
        LittleEndian::write_u64(&mut footer.txt_len, self.txt_len);
        footer.digest_concat = digest_concat;

        let mut payload = Vec::new();
        payload.extend_from_slice(bytemuck::bytes_of(&footer));
        payload.extend_from_slice(bytemuck::cast_slice(&self.components));
        let footer_entry = SectionEntry::new(
            footer_offset,
            0,
            SectionType::Footer,
            self.global_section_i,
            Fingerprint::NONE,
        );
        self.sections.push(footer_entry);
        payload.extend_from_slice(bytemuck::cast_slice(&self.sections));

        self.write_global_section(
            SectionType::Footer,
            &[],
            &payload,
            Codec::Zstd,
            cipher,
            Fingerprint::NONE,
        )?;

        let mut tail = [0u8; 8];
        LittleEndian::write_u64(&mut tail, footer_offset);
        self.file.write_all(&tail)?;
        self.file.flush()?;
        Ok(())
    }
}

impl Codec {
    /// Dictionary fragments are short-string heavy; deflate handles the
    /// small ones well and zstd the rest
    #[must_use]
    pub fn pick_dict(len: usize) -> Codec {
        if len < 32 {
            Codec::Stored
        } else if len < 4096 {
            Codec::Deflate
        } else {
            Codec::Zstd
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_sizes_fixed() {
        assert_eq!(std::mem::size_of::<FileHeaderData>(), 28);
        assert_eq!(std::mem::size_of::<FooterData>(), 56);
        assert_eq!(std::mem::size_of::<ComponentEntry>(), 56);
    }
}
