//! Sequence reads: four physical lines per record. The description line is
//! split into a compound template (and is the grep unit for the whole
//! record); bases and quality strings bypass the dictionary into sequence
//! local streams, referenced by length-carrying lookup snips.

use crate::context::LocalType;
use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::recon::{Recon, SpecialFn};
use crate::seg::{chomp, Seg};
use crate::txt_io::last_quad_line_end;
use crate::types::{
    no_concat_check, no_header_config, no_recon_init, vcf::recon_eol, DataType, DataTypeDef,
};

pub static DEF: DataTypeDef = DataTypeDef {
    data_type: DataType::Fastq,
    name: "fastq",
    extensions: &["fastq", "fq"],
    header_line_prefix: None,
    header_required: false,
    header_config: no_header_config,
    concat_check: no_concat_check,
    seg_init,
    seg_row,
    seg_finish: None,
    recon_init: no_recon_init,
    recon_row,
    specials: SPECIALS,
    last_record_end: last_quad_line_end,
    count_rows: crate::types::count_quads,
    has_random_access: false,
    chrom_fp: None,
};

static SPECIALS: &[SpecialFn] = &[];

/// Separators splitting a read description into compound items
const DESC_SEPS: &[u8] = b" :/=";

fn fp_desc() -> Fingerprint {
    Fingerprint::primary(b"DESC")
}
fn fp_seq() -> Fingerprint {
    Fingerprint::primary(b"SEQ")
}
fn fp_plus() -> Fingerprint {
    Fingerprint::primary(b"PLUS")
}
fn fp_qual() -> Fingerprint {
    Fingerprint::primary(b"QUAL")
}
fn fp_eol() -> Fingerprint {
    Fingerprint::primary(b"EOL")
}

fn seg_init(s: &mut Seg<'_>) -> Result<()> {
    s.ctx(fp_desc(), LocalType::Text, 0)?;
    s.ctx(fp_seq(), LocalType::Sequence, 0)?;
    s.ctx(fp_plus(), LocalType::Text, 0)?;
    s.ctx(fp_qual(), LocalType::Sequence, 0)?;
    s.ctx(fp_eol(), LocalType::Text, 0)?;
    Ok(())
}

/// One record: description, bases, '+' line, quality
fn seg_row(s: &mut Seg<'_>, text: &[u8]) -> Result<usize> {
    let mut consumed = 0usize;
    let mut lines = [(0usize, 0usize); 4];
    for line in &mut lines {
        if consumed >= text.len() {
            return Err(s.err_malformed("a four-line read record", &text[consumed.min(text.len())..]));
        }
        let len = memchr::memchr(b'\n', &text[consumed..]).map_or(text.len() - consumed, |i| i + 1);
        *line = (consumed, consumed + len);
        consumed += len;
    }

    // description
    let (desc, desc_eol) = chomp(&text[lines[0].0..lines[0].1]);
    if desc.first() != Some(&b'@') {
        return Err(s.err_malformed("a description line starting with '@'", desc));
    }
    let desc_did = s.ctx(fp_desc(), LocalType::Text, 0)?;
    s.seg_compound(desc_did, desc, DESC_SEPS, desc.len())?;
    s.seg_eol(desc_eol)?;

    // bases
    let (seq, seq_eol) = chomp(&text[lines[1].0..lines[1].1]);
    let seq_did = s.ctx(fp_seq(), LocalType::Sequence, 0)?;
    s.seg_seq(
        seq_did,
        s.row_start + lines[1].0 as u32,
        seq.len() as u32,
        seq.len(),
    )?;
    s.seg_eol(seq_eol)?;

    // the '+' separator line (may repeat the description)
    let (plus, plus_eol) = chomp(&text[lines[2].0..lines[2].1]);
    if plus.first() != Some(&b'+') {
        return Err(s.err_malformed("a separator line starting with '+'", plus));
    }
    let plus_did = s.ctx(fp_plus(), LocalType::Text, 0)?;
    s.seg_value(plus_did, plus, plus.len())?;
    s.seg_eol(plus_eol)?;

    // quality
    let (qual, qual_eol) = chomp(&text[lines[3].0..lines[3].1]);
    let qual_did = s.ctx(fp_qual(), LocalType::Sequence, 0)?;
    s.seg_seq(
        qual_did,
        s.row_start + lines[3].0 as u32,
        qual.len() as u32,
        qual.len(),
    )?;
    s.seg_eol(qual_eol)?;

    Ok(consumed)
}

fn recon_row(r: &mut Recon<'_>) -> Result<()> {
    let record_start = r.out.len();
    let eol_did = r.pctx(fp_eol());

    let desc_did = r.pctx(fp_desc());
    r.from_ctx(desc_did)?;
    let desc_end = r.out.len();
    recon_eol(r, eol_did)?;

    let seq_did = r.pctx(fp_seq());
    r.from_ctx(seq_did)?;
    recon_eol(r, eol_did)?;

    let plus_did = r.pctx(fp_plus());
    r.from_ctx(plus_did)?;
    recon_eol(r, eol_did)?;

    let qual_did = r.pctx(fp_qual());
    r.from_ctx(qual_did)?;
    recon_eol(r, eol_did)?;

    // the grep unit is the whole four-line record
    if let Some(pattern) = r.grep {
        let desc = &r.out.as_slice()[record_start..desc_end];
        if memchr::memmem::find(desc, pattern).is_none() {
            r.drop_row = true;
        }
    }
    Ok(())
}
