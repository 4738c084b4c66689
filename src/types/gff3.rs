//! Genomic feature tables. A line-kind context separates feature rows
//! from mid-file '#' directives; the sequence id and start position feed
//! the random-access index, the end coordinate rides the start's delta
//! chain, and the attributes column is a name=value info field.

use crate::context::LocalType;
use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::recon::{Recon, SpecialFn};
use crate::seg::{chomp, next_item, Seg};
use crate::snip;
use crate::txt_io::last_line_end;
use crate::types::{
    no_concat_check, no_header_config, no_recon_init, vcf::recon_eol, DataType, DataTypeDef,
};

pub static DEF: DataTypeDef = DataTypeDef {
    data_type: DataType::Gff3,
    name: "gff3",
    extensions: &["gff3", "gff"],
    header_line_prefix: Some(b'#'),
    header_required: false,
    header_config: no_header_config,
    concat_check: no_concat_check,
    seg_init,
    seg_row,
    seg_finish: None,
    recon_init: no_recon_init,
    recon_row,
    specials: SPECIALS,
    last_record_end: last_line_end,
    count_rows: crate::types::count_lines,
    has_random_access: true,
    chrom_fp: Some(fp_seqid),
};

/// Special handlers referenced by line-kind snips
static SPECIALS: &[SpecialFn] = &[special_feature, special_directive];

const ROW_FEATURE: u8 = 0;
const ROW_DIRECTIVE: u8 = 1;

fn fp_kind() -> Fingerprint {
    Fingerprint::primary(b"LINEMETA")
}
fn fp_seqid() -> Fingerprint {
    Fingerprint::primary(b"SEQID")
}
fn fp_source() -> Fingerprint {
    Fingerprint::primary(b"SOURCE")
}
fn fp_type() -> Fingerprint {
    Fingerprint::primary(b"TYPE")
}
fn fp_start() -> Fingerprint {
    Fingerprint::primary(b"START")
}
fn fp_end() -> Fingerprint {
    Fingerprint::primary(b"END")
}
fn fp_score() -> Fingerprint {
    Fingerprint::primary(b"SCORE")
}
fn fp_strand() -> Fingerprint {
    Fingerprint::primary(b"STRAND")
}
fn fp_phase() -> Fingerprint {
    Fingerprint::primary(b"PHASE")
}
fn fp_attrs() -> Fingerprint {
    Fingerprint::primary(b"ATTRS")
}
fn fp_comment() -> Fingerprint {
    Fingerprint::primary(b"COMMENT")
}
fn fp_eol() -> Fingerprint {
    Fingerprint::primary(b"EOL")
}

fn seg_init(s: &mut Seg<'_>) -> Result<()> {
    s.ctx(fp_kind(), LocalType::Text, 0)?;
    s.pos_ctx(fp_seqid())?;
    s.ctx(fp_source(), LocalType::Text, 0)?;
    s.ctx(fp_type(), LocalType::Text, 0)?;
    s.pos_ctx(fp_start())?;
    s.ctx(fp_end(), LocalType::Text, 0)?;
    s.ctx(fp_score(), LocalType::Text, 0)?;
    s.ctx(fp_strand(), LocalType::Text, 0)?;
    s.ctx(fp_phase(), LocalType::Text, 0)?;
    s.ctx(fp_attrs(), LocalType::Text, 0)?;
    s.ctx(fp_comment(), LocalType::Text, 0)?;
    s.ctx(fp_eol(), LocalType::Text, 0)?;
    Ok(())
}

fn seg_row(s: &mut Seg<'_>, text: &[u8]) -> Result<usize> {
    let row_len = memchr::memchr(b'\n', text).map_or(text.len(), |i| i + 1);
    let (content, eol) = chomp(&text[..row_len]);
    let kind_did = s.ctx(fp_kind(), LocalType::Text, 0)?;

    if content.first() == Some(&b'#') || content.is_empty() {
        let comment_did = s.ctx(fp_comment(), LocalType::Text, 0)?;
        s.seg_local_text(comment_did, content, content.len());
        s.seg_snip(kind_did, &snip::special(ROW_DIRECTIVE, b""), 0)?;
    } else {
        seg_feature(s, content)?;
        s.seg_snip(kind_did, &snip::special(ROW_FEATURE, b""), 0)?;
    }
    s.seg_eol(eol)?;
    Ok(row_len)
}

fn seg_feature(s: &mut Seg<'_>, content: &[u8]) -> Result<()> {
    let mut pos = 0usize;
    let mut field = |s: &mut Seg<'_>, what: &'static str| -> Result<(usize, usize)> {
        let start = pos;
        let (token, sep) = next_item(content, &mut pos, b"\t");
        if token.is_empty() && sep == 0 && start >= content.len() {
            return Err(s.err_malformed(what, content));
        }
        Ok((start, start + token.len()))
    };

    let (a, b) = field(s, "a seqid field")?;
    let seqid_did = s.pos_ctx(fp_seqid())?;
    s.seg_chrom(seqid_did, &content[a..b], b - a + 1)?;

    let (a, b) = field(s, "a source field")?;
    let source_did = s.ctx(fp_source(), LocalType::Text, 0)?;
    s.seg_value(source_did, &content[a..b], b - a + 1)?;

    let (a, b) = field(s, "a type field")?;
    let type_did = s.ctx(fp_type(), LocalType::Text, 0)?;
    s.seg_value(type_did, &content[a..b], b - a + 1)?;

    let (a, b) = field(s, "a numeric start field")?;
    let start_did = s.pos_ctx(fp_start())?;
    let start_pos = s.seg_pos(start_did, start_did, &content[a..b], b - a + 1)?;
    s.ra_pos(start_pos);

    let (a, b) = field(s, "a numeric end field")?;
    let end_did = s.ctx(fp_end(), LocalType::Text, 0)?;
    let end_pos = s.seg_pos(end_did, start_did, &content[a..b], b - a + 1)?;
    s.ra_pos(end_pos);

    let (a, b) = field(s, "a score field")?;
    let score_did = s.ctx(fp_score(), LocalType::Text, 0)?;
    s.seg_value(score_did, &content[a..b], b - a + 1)?;

    let (a, b) = field(s, "a strand field")?;
    let strand_did = s.ctx(fp_strand(), LocalType::Text, 0)?;
    s.seg_value(strand_did, &content[a..b], b - a + 1)?;

    let (a, b) = field(s, "a phase field")?;
    let phase_did = s.ctx(fp_phase(), LocalType::Text, 0)?;
    s.seg_value(phase_did, &content[a..b], b - a + 1)?;

    let (a, b) = field(s, "an attributes field")?;
    let attrs_did = s.ctx(fp_attrs(), LocalType::Text, 0)?;
    s.seg_info(attrs_did, &content[a..b], b - a + 1, None)?;
    Ok(())
}

fn recon_row(r: &mut Recon<'_>) -> Result<()> {
    let kind_did = r.pctx(fp_kind());
    r.from_ctx(kind_did)?;
    let eol_did = r.pctx(fp_eol());
    recon_eol(r, eol_did)?;
    Ok(())
}

fn special_feature(r: &mut Recon<'_>, _did: usize, _payload: &[u8]) -> Result<()> {
    let seqid_did = r.pctx(fp_seqid());
    r.from_ctx(seqid_did)?;
    let chrom_word = r.last_word;
    r.emit(b"\t");

    for fp in [fp_source(), fp_type()] {
        let did = r.pctx(fp);
        r.from_ctx(did)?;
        r.emit(b"\t");
    }

    let start_did = r.pctx(fp_start());
    r.from_ctx(start_did)?;
    let row_start = r.pctxs[start_did].last_value;
    r.emit(b"\t");

    let end_did = r.pctx(fp_end());
    r.from_ctx(end_did)?;
    let row_end = r.pctxs[start_did].last_value;
    r.emit(b"\t");

    for fp in [fp_score(), fp_strand(), fp_phase()] {
        let did = r.pctx(fp);
        r.from_ctx(did)?;
        r.emit(b"\t");
    }

    let attrs_did = r.pctx(fp_attrs());
    r.from_ctx(attrs_did)?;

    if let Some(filter) = r.filter {
        let min = row_start.max(0) as u64;
        let max = row_end.max(row_start).max(0) as u64;
        if !filter.range_overlaps(chrom_word, min, max) {
            r.drop_row = true;
        }
    }
    Ok(())
}

/// Mid-file '#' directive or blank line, kept verbatim (and always shown,
/// regardless of region filters)
fn special_directive(r: &mut Recon<'_>, _did: usize, _payload: &[u8]) -> Result<()> {
    let comment_did = r.pctx(fp_comment());
    r.from_ctx(comment_did)?;
    Ok(())
}
