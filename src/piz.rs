//! The decode pipeline: memory-map the archive, read the footer from the
//! trailing offset, load dictionaries and the random-access index, then
//! hand each in-scope block to a worker for decompression and
//! reconstruction. Output is written strictly in block order; the running
//! digest of the reconstructed bytes is compared against the archive at
//! the end (only on full-fidelity decodes - filters disable verification
//! because bytes are deliberately withheld).

use byteorder::{ByteOrder, LittleEndian};
use memmap2::Mmap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use crate::archive::{ComponentEntry, FileHeaderData, FooterData, FORMAT_VERSION};
use crate::context::LocalType;
use crate::crypt::SectionCipher;
use crate::digest::{hex, RunningDigest};
use crate::dispatcher::{Dispatcher, WorkFn};
use crate::error::{CryptError, HeaderError, IndexError, ReconError, Result};
use crate::fingerprint::Fingerprint;
use crate::random_access::RaIndex;
use crate::recon::{DictSet, Recon};
use crate::regions::{RegionFilter, RegionSpec};
use crate::section::{SectionEntry, SectionRef, SectionType};
use crate::types::{DataType, DataTypeDef};
use crate::vblock::{VBlock, VBlockPool};

#[derive(Clone, Default)]
pub struct PizOptions {
    /// Genomic regions to decode ("chr1", "chr1:100-200")
    pub regions: Vec<String>,
    /// Substring filter on identifier lines (sequence-read types)
    pub grep: Option<String>,
    pub password: Option<String>,
    /// Join wrapped sequence lines into one line per sequence
    pub sequential: bool,
    /// Drop the FORMAT and sample columns of variant-call data
    pub drop_genotypes: bool,
    /// Emit only the text headers
    pub header_only: bool,
    /// Worker threads; 0 means all cores
    pub threads: usize,
}

#[derive(Debug, Default)]
pub struct PizSummary {
    pub txt_len: u64,
    pub num_components: usize,
}

/// Archive metadata, without decoding any block
#[derive(Debug)]
pub struct ArchiveInfo {
    pub data_type: &'static str,
    pub encrypted: bool,
    pub num_components: usize,
    pub num_vblocks: u32,
    pub txt_len: u64,
}

/// The parsed global area of an archive: everything the decode path needs
/// before touching any block
struct GlobalArea {
    mmap: Arc<Mmap>,
    def: &'static DataTypeDef,
    cipher: Option<Arc<SectionCipher>>,
    footer: FooterData,
    components: Vec<ComponentEntry>,
    sections: Vec<SectionEntry>,
    dicts: Arc<DictSet>,
    optimized: bool,
}

fn read_global_area(archive: &Path, password: Option<&str>) -> Result<GlobalArea> {
    let file = fs::File::open(archive)?;
    let mmap = Arc::new(unsafe { Mmap::map(&file) }?);
    let data: &[u8] = &mmap;
    if data.len() < 8 {
        return Err(HeaderError::InvalidFileMagic.into());
    }

    // file header: salt and flags, never encrypted
    let fh_sec = SectionRef::read(data, 0)?;
    fh_sec.expect_type(SectionType::FileHeader)?;
    let mut payload = Vec::new();
    fh_sec.decode_payload(None, false, &mut payload)?;
    if payload.len() != std::mem::size_of::<FileHeaderData>() {
        return Err(HeaderError::InvalidFileMagic.into());
    }
    let file_header: FileHeaderData = *bytemuck::from_bytes(&payload);
    if file_header.version > FORMAT_VERSION {
        return Err(HeaderError::UnsupportedVersion {
            found: file_header.version,
            supported: FORMAT_VERSION,
        }
        .into());
    }
    let data_type = DataType::from_tag(file_header.data_type_tag)?;
    let encrypted = file_header.encrypted != 0;
    let cipher = match (password, encrypted) {
        (Some(password), true) => Some(Arc::new(SectionCipher::new(password, &file_header.salt))),
        (None, true) => return Err(CryptError::PasswordRequired.into()),
        (Some(_), false) => return Err(CryptError::NotEncrypted.into()),
        (None, false) => None,
    };

    // the footer is the first encrypted section we touch: its tag is the
    // wrong-password self test
    let footer_offset = LittleEndian::read_u64(&data[data.len() - 8..]);
    if footer_offset as usize >= data.len() {
        return Err(HeaderError::BadFooterOffset(footer_offset).into());
    }
    let footer_sec = SectionRef::read(data, footer_offset)?;
    footer_sec.expect_type(SectionType::Footer)?;
    let mut payload = Vec::new();
    footer_sec.decode_payload(cipher.as_deref(), true, &mut payload)?;

    let fixed_len = std::mem::size_of::<FooterData>();
    if payload.len() < fixed_len {
        return Err(HeaderError::BadFooterOffset(footer_offset).into());
    }
    let footer: FooterData = *bytemuck::from_bytes(&payload[..fixed_len]);
    let comp_len = std::mem::size_of::<ComponentEntry>();
    let sec_len = std::mem::size_of::<SectionEntry>();
    let comps_end = fixed_len + footer.num_components() as usize * comp_len;
    let secs_end = comps_end + footer.num_sections() as usize * sec_len;
    if payload.len() < secs_end {
        return Err(HeaderError::BadFooterOffset(footer_offset).into());
    }
    let components: Vec<ComponentEntry> =
        bytemuck::cast_slice(&payload[fixed_len..comps_end]).to_vec();
    let sections: Vec<SectionEntry> = bytemuck::cast_slice(&payload[comps_end..secs_end]).to_vec();

    // dictionaries, in file order so word indices line up with the encoder
    let mut dicts = DictSet::new();
    for entry in &sections {
        if entry.section_type()? != SectionType::Dict {
            continue;
        }
        let sec = SectionRef::read(data, entry.offset())?;
        let sub = sec.ctx_sub_header();
        let mut payload = Vec::new();
        sec.decode_payload(cipher.as_deref(), false, &mut payload)?;
        dicts.append_fragment(sub.fingerprint, &payload, sub.num_words() as usize)?;
    }

    Ok(GlobalArea {
        mmap,
        def: data_type.def(),
        cipher,
        footer,
        components,
        sections,
        dicts: Arc::new(dicts),
        optimized: file_header.optimized != 0,
    })
}

/// Archive metadata without decoding any block
pub fn list(archive: &Path, password: Option<&str>) -> Result<ArchiveInfo> {
    let global = read_global_area(archive, password)?;
    Ok(ArchiveInfo {
        data_type: global.def.name,
        encrypted: global.footer.encrypted != 0,
        num_components: global.components.len(),
        num_vblocks: global.footer.num_vblocks(),
        txt_len: global.footer.txt_len(),
    })
}

/// Shared state of a decode session's worker pool
struct PizShared {
    dicts: Arc<DictSet>,
    cipher: Option<Arc<SectionCipher>>,
    def: &'static DataTypeDef,
    filter: Option<RegionFilter>,
    grep: Option<Vec<u8>>,
    sequential: bool,
    drop_genotypes: bool,
    /// Size and digest checks only hold on full-fidelity decodes
    verify: bool,
    /// FASTA grep state carried block to block (single-worker mode)
    contig_carry: Mutex<bool>,
}

/// Decompress an archive into `out`
pub fn decompress(archive: &Path, out: &mut dyn Write, opts: &PizOptions) -> Result<PizSummary> {
    let global = read_global_area(archive, opts.password.as_deref())?;
    let def = global.def;
    let data: &[u8] = &global.mmap;

    // region filter, resolved against the chromosome dictionary
    let filter = if opts.regions.is_empty() {
        None
    } else {
        let chrom_fp = def.chrom_fp.ok_or(IndexError::NoIndex)?;
        let chrom_dict = global.dicts.get(chrom_fp());
        let specs = opts
            .regions
            .iter()
            .map(|r| RegionSpec::parse(r))
            .collect::<Result<Vec<_>>>()?;
        Some(RegionFilter::new(&specs, |name| {
            chrom_dict.find(name.as_bytes())
        }))
    };

    // blocks in scope: intersect the random-access index with the filter
    let selected: Option<Vec<u32>> = match &filter {
        None => None,
        Some(filter) => {
            let ra_entry = global
                .sections
                .iter()
                .find(|e| e.section_type().ok() == Some(SectionType::RandomAccess))
                .ok_or(IndexError::NoIndex)?;
            let sec = SectionRef::read(data, ra_entry.offset())?;
            let mut payload = Vec::new();
            sec.decode_payload(global.cipher.as_deref(), false, &mut payload)?;
            Some(RaIndex::from_payload(&payload).matching_blocks(filter))
        }
    };

    // byte range of each block's contiguous section run
    let vb_ranges = block_ranges(&global)?;

    let verify = filter.is_none()
        && opts.grep.is_none()
        && !opts.sequential
        && !opts.drop_genotypes
        && !opts.header_only
        && !global.optimized;

    let fasta_grep = def.data_type == DataType::Fasta && opts.grep.is_some();
    let threads = if fasta_grep { 1 } else { opts.threads };

    let shared = Arc::new(PizShared {
        dicts: global.dicts.clone(),
        cipher: global.cipher.clone(),
        def,
        filter,
        grep: opts.grep.as_ref().map(|g| g.as_bytes().to_vec()),
        sequential: opts.sequential,
        drop_genotypes: opts.drop_genotypes,
        verify,
        contig_carry: Mutex::new(false),
    });

    let work_shared = shared.clone();
    let work: WorkFn = Arc::new(move |vb| decompress_block(vb, &work_shared));
    let mut dispatcher = Dispatcher::new(threads, work);
    let blocks = VBlockPool::new(dispatcher.max_outstanding());

    let mut digest = RunningDigest::new();
    let mut summary = PizSummary::default();
    let mut next_vb = 1u32;

    for (comp_i, component) in global.components.iter().enumerate() {
        // the component's text header is always written
        let header_entry = &global.sections[component.txt_header_section() as usize];
        let sec = SectionRef::read(data, header_entry.offset())?;
        sec.expect_type(SectionType::TxtHeader)?;
        let mut header = Vec::new();
        sec.decode_payload(global.cipher.as_deref(), false, &mut header)?;
        out.write_all(&header)?;
        digest.update(&header);
        summary.txt_len += header.len() as u64;

        let vb_range = next_vb..next_vb + component.num_vblocks();
        next_vb = vb_range.end;

        if !opts.header_only {
            for vb_i in vb_range {
                if let Some(selected) = &selected {
                    if !selected.contains(&vb_i) {
                        continue;
                    }
                }
                while let Some(vb) = dispatcher.next_done(false)? {
                    summary.txt_len +=
                        write_recon(out, &mut digest, &vb)?;
                    blocks.release(vb);
                }
                if !dispatcher.has_capacity() {
                    if let Some(vb) = dispatcher.next_done(true)? {
                        summary.txt_len += write_recon(out, &mut digest, &vb)?;
                        blocks.release(vb);
                    }
                }
                let mut vb = blocks.get(vb_i, def.data_type);
                let &(start, end) = vb_ranges
                    .get(&vb_i)
                    .ok_or(HeaderError::UnexpectedEof {
                        expected: "vb sections",
                        offset: 0,
                    })?;
                vb.z_data
                    .extend_from_slice(&data[start as usize..end as usize]);
                dispatcher.dispatch(vb)?;
            }
        }

        while let Some(vb) = dispatcher.next_done(true)? {
            summary.txt_len += write_recon(out, &mut digest, &vb)?;
            blocks.release(vb);
        }

        // per-component digest over the reconstructed bytes
        let got = digest.finish_component();
        if verify && got != component.digest {
            return Err(ReconError::DigestMismatch {
                expected: hex(&component.digest),
                got: hex(&got),
            }
            .into());
        }
        summary.num_components = comp_i + 1;
    }

    dispatcher.finish()?;

    let got = digest.finish_concat();
    if verify && got != global.footer.digest_concat {
        return Err(ReconError::DigestMismatch {
            expected: hex(&global.footer.digest_concat),
            got: hex(&got),
        }
        .into());
    }
    out.flush()?;
    Ok(summary)
}

fn write_recon(
    out: &mut dyn Write,
    digest: &mut RunningDigest,
    vb: &VBlock,
) -> Result<u64> {
    out.write_all(vb.recon.as_slice())?;
    digest.update(vb.recon.as_slice());
    Ok(vb.recon.len() as u64)
}

/// Contiguous byte range of each block's sections, derived from the
/// section list (entries are in file order)
fn block_ranges(global: &GlobalArea) -> Result<HashMap<u32, (u64, u64)>> {
    let mut ranges: HashMap<u32, (u64, u64)> = HashMap::new();
    let entries = &global.sections;
    for (i, entry) in entries.iter().enumerate() {
        let vblock_i = entry.vblock_i();
        if vblock_i == 0 {
            continue;
        }
        let end = entries
            .get(i + 1)
            .map_or(global.mmap.len() as u64 - 8, SectionEntry::offset);
        let range = ranges.entry(vblock_i).or_insert((entry.offset(), end));
        range.0 = range.0.min(entry.offset());
        range.1 = range.1.max(end);
    }
    Ok(ranges)
}

/// Worker entry: parse this block's sections, install context streams,
/// and reconstruct every row (rolling back rows the filters exclude)
fn decompress_block(vb: &mut VBlock, shared: &PizShared) -> Result<()> {
    let z = vb.z_data.as_slice();
    let vbh = SectionRef::read(z, 0)?;
    vbh.expect_type(SectionType::VbHeader)?;
    let sub = vbh.vb_sub_header();
    vb.num_rows = sub.num_lines();
    vb.expected_txt_len = sub.txt_len();
    vb.first_row = sub.first_line();

    let mut recon = Recon::new(
        vb.vblock_i,
        vb.num_rows,
        vb.first_row,
        &shared.dicts,
        shared.def.specials,
        shared.filter.as_ref(),
        shared.grep.as_deref(),
    );
    recon.out = std::mem::take(&mut vb.recon);
    recon.out.reserve(vb.expected_txt_len as usize);
    recon.sequential = shared.sequential;
    recon.drop_genotypes = shared.drop_genotypes;
    if shared.grep.is_some() && shared.def.data_type == DataType::Fasta {
        recon.contig_grepped_out = *shared.contig_carry.lock();
    }

    // context streams, in section order
    let mut at = vbh.end;
    for _ in 0..sub.num_ctx_sections() {
        let sec = SectionRef::read(z, at)?;
        at = sec.end;
        let section_type = sec.header.section_type()?;
        if !matches!(section_type, SectionType::B250 | SectionType::Local) {
            return Err(HeaderError::SectionTypeMismatch {
                expected: "b250 or local",
                found: section_type.name(),
            }
            .into());
        }
        let ctx_sub = sec.ctx_sub_header();
        if skip_section(shared, ctx_sub.fingerprint, ctx_sub.ctx_flags) {
            continue;
        }
        let ltype = LocalType::from_tag(ctx_sub.ltype)?;
        let did = recon.install_ctx(ctx_sub.fingerprint, ltype, ctx_sub.ctx_flags);
        let mut payload = Vec::new();
        sec.decode_payload(shared.cipher.as_deref(), false, &mut payload)?;
        if section_type == SectionType::B250 {
            recon.set_b250(did, payload);
        } else {
            recon.set_local(did, payload);
        }
    }

    (shared.def.recon_init)(&mut recon)?;
    for _ in 0..vb.num_rows {
        recon.drop_row = false;
        let mark = recon.out.len();
        (shared.def.recon_row)(&mut recon)?;
        if recon.drop_row {
            recon.out.truncate(mark);
        }
        recon.row_i += 1;
    }

    if shared.verify && recon.out.len() as u64 != vb.expected_txt_len {
        return Err(ReconError::SizeMismatch {
            vblock_i: vb.vblock_i,
            expected: vb.expected_txt_len,
            got: recon.out.len() as u64,
        }
        .into());
    }

    if shared.grep.is_some() && shared.def.data_type == DataType::Fasta {
        *shared.contig_carry.lock() = recon.contig_grepped_out;
    }

    vb.recon = recon.out;
    Ok(())
}

/// Sections whose contexts this decode will never reconstruct are not
/// even decompressed
fn skip_section(shared: &PizShared, fingerprint: Fingerprint, ctx_flags: u8) -> bool {
    use crate::context::FL_NO_ONE_UP;
    if !shared.drop_genotypes {
        return false;
    }
    fingerprint == Fingerprint::primary(b"FORMAT")
        || fingerprint == Fingerprint::primary(b"SAMPLES")
        || ctx_flags & FL_NO_ONE_UP != 0
}
