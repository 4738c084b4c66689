//! Reference sequences. Every physical line is one row; a line-kind
//! context routes reconstruction through special handlers for description,
//! comment and sequence lines. Grep spans description to description and
//! carries across blocks; the `sequential` decode flag joins wrapped
//! sequence lines back into one.

use crate::context::LocalType;
use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::recon::{Recon, SpecialFn};
use crate::seg::{chomp, Seg};
use crate::snip;
use crate::txt_io::last_line_end;
use crate::types::{
    no_concat_check, no_header_config, no_recon_init, vcf::recon_eol, DataType, DataTypeDef,
};

pub static DEF: DataTypeDef = DataTypeDef {
    data_type: DataType::Fasta,
    name: "fasta",
    extensions: &["fasta", "fa", "fna", "faa"],
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
    last_record_end: last_line_end,
    count_rows: crate::types::count_lines,
    has_random_access: false,
    chrom_fp: None,
};

/// Special handlers referenced by line-kind snips
static SPECIALS: &[SpecialFn] = &[special_desc, special_comment, special_seq];

const ROW_DESC: u8 = 0;
const ROW_COMMENT: u8 = 1;
const ROW_SEQ: u8 = 2;

/// Separators splitting a description into compound items
const DESC_SEPS: &[u8] = b" :/=|";

fn fp_linemeta() -> Fingerprint {
    Fingerprint::primary(b"LINEMETA")
}
fn fp_desc() -> Fingerprint {
    Fingerprint::primary(b"DESC")
}
fn fp_comment() -> Fingerprint {
    Fingerprint::primary(b"COMMENT")
}
fn fp_seq() -> Fingerprint {
    Fingerprint::primary(b"SEQ")
}
fn fp_eol() -> Fingerprint {
    Fingerprint::primary(b"EOL")
}

fn seg_init(s: &mut Seg<'_>) -> Result<()> {
    s.ctx(fp_linemeta(), LocalType::Text, 0)?;
    s.ctx(fp_desc(), LocalType::Text, 0)?;
    s.ctx(fp_comment(), LocalType::Text, 0)?;
    s.ctx(fp_seq(), LocalType::Sequence, 0)?;
    s.ctx(fp_eol(), LocalType::Text, 0)?;
    // remembers whether the previous line was part of a sequence
    s.prev_row_kind = u8::MAX;
    Ok(())
}

fn seg_row(s: &mut Seg<'_>, text: &[u8]) -> Result<usize> {
    let row_len = memchr::memchr(b'\n', text).map_or(text.len(), |i| i + 1);
    let (content, eol) = chomp(&text[..row_len]);
    let meta_did = s.ctx(fp_linemeta(), LocalType::Text, 0)?;

    // a ';' line after a sequence opens a new record like '>' does
    let is_desc = content.first() == Some(&b'>')
        || (content.first() == Some(&b';') && s.prev_row_kind == ROW_SEQ);

    if is_desc {
        let desc_did = s.ctx(fp_desc(), LocalType::Text, 0)?;
        s.seg_compound(desc_did, content, DESC_SEPS, content.len())?;
        s.seg_snip(meta_did, &snip::special(ROW_DESC, &snip::redirect(fp_desc())), 0)?;
        s.prev_row_kind = ROW_DESC;
    } else if content.first() == Some(&b';') || content.is_empty() {
        let comment_did = s.ctx(fp_comment(), LocalType::Text, 0)?;
        s.seg_local_text(comment_did, content, content.len());
        s.seg_snip(
            meta_did,
            &snip::special(ROW_COMMENT, &snip::other_lookup(fp_comment())),
            0,
        )?;
        s.prev_row_kind = ROW_COMMENT;
    } else {
        let seq_did = s.ctx(fp_seq(), LocalType::Sequence, 0)?;
        s.seg_seq(seq_did, s.row_start, content.len() as u32, content.len())?;
        // the handler needs to know whether this line opens a contig
        let first = if s.prev_row_kind == ROW_SEQ { b'0' } else { b'1' };
        s.seg_snip(meta_did, &snip::special(ROW_SEQ, &[first]), 0)?;
        s.prev_row_kind = ROW_SEQ;
    }
    s.seg_eol(eol)?;
    Ok(row_len)
}

fn recon_row(r: &mut Recon<'_>) -> Result<()> {
    let meta_did = r.pctx(fp_linemeta());
    r.from_ctx(meta_did)?;
    let eol_did = r.pctx(fp_eol());
    recon_eol(r, eol_did)?;
    Ok(())
}

/// Description line: reconstruct it through the redirection carried in
/// the snip, then decide the grep fate of this contig (carried until the
/// next description)
fn special_desc(r: &mut Recon<'_>, did: usize, payload: &[u8]) -> Result<()> {
    let desc_start = r.out.len();
    r.one_snip(did, payload)?;
    if let Some(pattern) = r.grep {
        let desc = &r.out.as_slice()[desc_start..];
        r.contig_grepped_out = memchr::memmem::find(desc, pattern).is_none();
    }
    if r.contig_grepped_out {
        r.drop_row = true;
    }
    r.prev_row_kind = ROW_DESC;
    Ok(())
}

/// Comment line: the snip payload looks the line up in the comment
/// context's local stream
fn special_comment(r: &mut Recon<'_>, did: usize, payload: &[u8]) -> Result<()> {
    r.one_snip(did, payload)?;
    if r.contig_grepped_out {
        r.drop_row = true;
    }
    r.prev_row_kind = ROW_COMMENT;
    Ok(())
}

/// Sequence line: with `sequential` decode, the terminator of the previous
/// sequence line is removed so a wrapped sequence joins into one line.
/// The trim must not run for a grepped-out contig: this row is about to
/// be rolled back, but the trim would reach below the row start and eat
/// the terminator of the previously kept contig.
fn special_seq(r: &mut Recon<'_>, _did: usize, payload: &[u8]) -> Result<()> {
    let first_in_contig = payload.first() == Some(&b'1');
    if r.sequential && !first_in_contig && r.prev_row_kind == ROW_SEQ && !r.contig_grepped_out {
        let out = r.out.as_slice();
        let trim = if out.ends_with(b"\r\n") {
            2
        } else if out.ends_with(b"\n") {
            1
        } else {
            0
        };
        let len = out.len() - trim;
        r.out.truncate(len);
    }
    let seq_did = r.pctx(fp_seq());
    r.from_ctx(seq_did)?;
    if r.contig_grepped_out {
        r.drop_row = true;
    }
    r.prev_row_kind = ROW_SEQ;
    Ok(())
}
