//! The compress pipeline: the calling thread reads blocks and writes the
//! archive; workers segment, merge, encode and compress. Output is written
//! strictly in block order, so the archive layout is deterministic for a
//! given input regardless of worker timing. After the last component come
//! the dictionary fragments (per component), the random-access section and
//! the footer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::archive::{ArchiveWriter, ZipShared};
use crate::codec::{self, Codec};
use crate::context::{CtxPool, LocalType};
use crate::crypt::{fresh_salt, SectionCipher};
use crate::digest::RunningDigest;
use crate::dispatcher::{Dispatcher, WorkFn};
use crate::error::{Error, HeaderError, Result};
use crate::random_access::RaBuf;
use crate::section::{
    emit_section, emit_section_iter, CtxSubHeader, SectionCoords, SectionType, VbSubHeader,
};
use crate::seg;
use crate::types::{DataType, DataTypeDef};
use crate::txt_io::TxtReader;
use crate::vblock::{VBlock, VBlockPool, DEFAULT_BLOCK_SIZE};

#[derive(Clone)]
pub struct ZipOptions {
    /// Target uncompressed block size in bytes
    pub block_size: usize,
    /// Worker threads; 0 means all cores
    pub threads: usize,
    pub password: Option<String>,
    /// Opt-in two-significant-digit rounding of whitelisted numeric fields
    pub optimize: bool,
    /// Override input-type detection
    pub data_type: Option<DataType>,
}

impl Default for ZipOptions {
    fn default() -> Self {
        ZipOptions {
            block_size: DEFAULT_BLOCK_SIZE,
            threads: 0,
            password: None,
            optimize: false,
            data_type: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct ZipSummary {
    pub txt_len: u64,
    pub num_vblocks: u32,
    pub num_components: usize,
}

/// Compress `inputs` into one archive at `out`. Inputs concatenate into
/// one archive with one component each; an unrecognized input in
/// multi-file mode is skipped with a warning, any other failure removes
/// the partial archive.
pub fn compress(inputs: &[PathBuf], out: &Path, opts: &ZipOptions) -> Result<ZipSummary> {
    let result = compress_inner(inputs, out, opts);
    if result.is_err() {
        let _ = std::fs::remove_file(out);
    }
    result
}

fn compress_inner(inputs: &[PathBuf], out: &Path, opts: &ZipOptions) -> Result<ZipSummary> {
    let first = inputs.first().ok_or_else(|| {
        Error::from(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "no input files",
        ))
    })?;
    let data_type = match opts.data_type {
        Some(data_type) => data_type,
        None => DataType::detect(first)?,
    };

    let mut session = ZipSession::create(out, data_type, opts)?;
    for input in inputs {
        let input_type = opts
            .data_type
            .map(Ok)
            .unwrap_or_else(|| DataType::detect(input));
        match input_type {
            Ok(t) if t == data_type => session.add_file(input)?,
            Ok(_) | Err(_) if inputs.len() > 1 => {
                eprintln!(
                    "seqzip: skipping {}: not a {} file",
                    input.display(),
                    data_type.def().name
                );
            }
            Ok(t) => {
                return Err(HeaderError::IncompatibleComponent {
                    path: input.clone(),
                    reason: format!(
                        "data type {} does not match the archive's {}",
                        t.def().name,
                        data_type.def().name
                    ),
                }
                .into())
            }
            Err(e) => return Err(e),
        }
    }
    session.finish()
}

/// One compress session: no global state, several sessions can run in one
/// process
struct ZipSession {
    writer: ArchiveWriter,
    shared: Arc<ZipShared>,
    dispatcher: Dispatcher,
    blocks: VBlockPool,
    digest: RunningDigest,
    data_type: DataType,
    def: &'static DataTypeDef,
    opts: ZipOptions,
    next_vblock_i: u32,
    rows_issued: u64,
    num_components: usize,
}

impl ZipSession {
    fn create(out: &Path, data_type: DataType, opts: &ZipOptions) -> Result<Self> {
        let salt = fresh_salt();
        let cipher = opts
            .password
            .as_deref()
            .map(|password| SectionCipher::new(password, &salt));
        let encrypted = cipher.is_some();

        let writer = ArchiveWriter::create(
            out,
            data_type,
            opts.block_size as u64,
            salt,
            encrypted,
            opts.optimize,
            cipher.as_ref(),
        )?;
        let shared = Arc::new(ZipShared {
            pool: CtxPool::new(),
            ra: RaBuf::default(),
            cipher,
        });

        let def = data_type.def();
        let optimize = opts.optimize;
        let work_shared = shared.clone();
        let work: WorkFn = Arc::new(move |vb| compress_block(vb, &work_shared, def, optimize));
        let dispatcher = Dispatcher::new(opts.threads, work);
        let blocks = VBlockPool::new(dispatcher.max_outstanding());

        Ok(ZipSession {
            writer,
            shared,
            dispatcher,
            blocks,
            digest: RunningDigest::new(),
            data_type,
            def,
            opts: opts.clone(),
            next_vblock_i: 1,
            rows_issued: 0,
            num_components: 0,
        })
    }

    fn add_file(&mut self, input: &Path) -> Result<()> {
        let mut reader = TxtReader::open(input)?;
        let header = reader.read_header(self.def, &mut self.digest)?;
        self.writer
            .begin_component(input, &header, self.shared.cipher.as_ref())?;
        let dt_config = (self.def.header_config)(&header);

        let component_txt_start = self.writer.txt_len - header.len() as u64;
        let component_rows_start = self.rows_issued;

        loop {
            while let Some(vb) = self.dispatcher.next_done(false)? {
                self.output_vb(vb)?;
            }
            if !self.dispatcher.has_capacity() {
                if let Some(vb) = self.dispatcher.next_done(true)? {
                    self.output_vb(vb)?;
                }
                continue;
            }

            let mut vb = self.blocks.get(self.next_vblock_i, self.data_type);
            vb.first_row = self.rows_issued;
            vb.dt_config = dt_config;
            vb.path = input.to_path_buf();
            reader.rows_issued = self.rows_issued;
            let got = reader.read_block(
                &mut vb.txt,
                self.opts.block_size,
                self.def,
                &mut self.digest,
            )?;
            if !got {
                self.blocks.release(vb);
                break;
            }
            self.rows_issued += (self.def.count_rows)(&vb.txt);
            self.next_vblock_i += 1;
            self.dispatcher.dispatch(vb)?;
        }

        while let Some(vb) = self.dispatcher.next_done(true)? {
            self.output_vb(vb)?;
        }

        // component epilogue: dictionary fragments, digest, counters
        self.writer
            .write_component_dicts(&self.shared.pool, self.shared.cipher.as_ref())?;
        let digest = self.digest.finish_component();
        self.writer.end_component(
            self.writer.txt_len - component_txt_start,
            self.rows_issued - component_rows_start,
            digest,
        );
        self.num_components += 1;
        Ok(())
    }

    fn output_vb(&mut self, vb: Box<VBlock>) -> Result<()> {
        let txt_len = vb.txt.len() as u64 - vb.txt_savings;
        self.writer.write_vb(vb.z_data.as_slice(), txt_len)?;
        self.blocks.release(vb);
        Ok(())
    }

    fn finish(self) -> Result<ZipSummary> {
        let ZipSession {
            writer,
            shared,
            dispatcher,
            digest,
            num_components,
            ..
        } = self;
        dispatcher.finish()?;
        let summary = ZipSummary {
            txt_len: writer.txt_len,
            num_vblocks: writer.num_vblocks,
            num_components,
        };
        writer.finish(&shared.ra, digest.finish_concat(), shared.cipher.as_ref())?;
        Ok(summary)
    }
}

/// Worker entry: segment, merge into the global contexts (one lock at a
/// time), resolve random-access chromosome references, generate b250, and
/// serialize this block's sections into its private buffer.
fn compress_block(
    vb: &mut VBlock,
    shared: &ZipShared,
    def: &'static DataTypeDef,
    optimize: bool,
) -> Result<()> {
    let path = vb.path.clone();
    seg::seg_block(vb, &shared.pool, def, &path, optimize, vb.dt_config)?;

    for did in 0..vb.vctxs.len() {
        if vb.vctxs[did].is_unused() {
            continue;
        }
        let zctx = shared.pool.get(vb.vctxs[did].zctx_i);
        let map = vb.vctxs[did].merge_into_global(&zctx)?;
        if vb.ra_chrom_did == Some(did) && !vb.ra.is_empty() {
            shared.ra.append(vb.ra.resolve(vb.vblock_i, &map));
        }
    }

    for vctx in &mut vb.vctxs {
        vctx.generate_b250();
    }

    serialize_sections(vb, shared)
}

fn serialize_sections(vb: &mut VBlock, shared: &ZipShared) -> Result<()> {
    let mut z_data = std::mem::take(&mut vb.z_data);
    let z = z_data.as_mut_vec();
    let cipher = shared.cipher.as_ref();

    let num_b250 = vb.vctxs.iter().filter(|c| !c.b250.is_empty()).count();
    let num_local = vb
        .vctxs
        .iter()
        .filter(|c| !c.local.is_empty() || !c.local_spans.is_empty())
        .count();

    let sub = VbSubHeader::new(
        vb.num_rows,
        vb.txt.len() as u64 - vb.txt_savings,
        vb.first_row,
        vb.longest_row,
        (num_b250 + num_local) as u32,
    );
    let mut section_i: u16 = 0;
    emit_section(
        z,
        SectionType::VbHeader,
        bytemuck::bytes_of(&sub),
        b"",
        Codec::Stored,
        &SectionCoords {
            cipher,
            vblock_i: vb.vblock_i,
            section_i,
        },
    )?;
    section_i += 1;

    // all b250 sections, then all local sections; empty contexts omitted
    for vctx in &vb.vctxs {
        if vctx.b250.is_empty() {
            continue;
        }
        let sub = CtxSubHeader::new(
            vctx.fingerprint,
            vctx.ltype.tag(),
            vctx.flags,
            vctx.word_refs.len() as u32,
        );
        emit_section(
            z,
            SectionType::B250,
            bytemuck::bytes_of(&sub),
            &vctx.b250,
            codec::pick(vctx.b250.len(), false),
            &SectionCoords {
                cipher,
                vblock_i: vb.vblock_i,
                section_i,
            },
        )?;
        section_i += 1;
    }

    let txt = vb.txt.as_slice();
    for vctx in &vb.vctxs {
        if vctx.local.is_empty() && vctx.local_spans.is_empty() {
            continue;
        }
        let sub = CtxSubHeader::new(vctx.fingerprint, vctx.ltype.tag(), vctx.flags, 0);
        let payload_len = vctx.local_len() as usize;
        let codec = codec::pick(payload_len, vctx.ltype == LocalType::Sequence);
        let coords = SectionCoords {
            cipher,
            vblock_i: vb.vblock_i,
            section_i,
        };
        if vctx.local_spans.is_empty() {
            emit_section(
                z,
                SectionType::Local,
                bytemuck::bytes_of(&sub),
                &vctx.local,
                codec,
                &coords,
            )?;
        } else {
            // sequence payloads compress straight from their line spans
            let parts = vctx
                .local_spans
                .iter()
                .map(|&(start, len)| &txt[start as usize..(start + len) as usize]);
            emit_section_iter(
                z,
                SectionType::Local,
                bytemuck::bytes_of(&sub),
                parts,
                codec,
                &coords,
            )?;
        }
        section_i += 1;
    }

    vb.z_data = z_data;
    Ok(())
}
