//! Aligned reads. The read name is a compound template; RNAME and POS
//! feed the random-access index; PNEXT rides the same delta chain as POS;
//! bases and qualities go to sequence local streams; optional TAG:TYPE:VAL
//! fields expand through a prefixed template keyed by tag and type.

use crate::context::LocalType;
use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::recon::{Recon, ReconStatus, SpecialFn};
use crate::seg::{chomp, next_item, Seg, TemplateBuilder};
use crate::snip;
use crate::txt_io::last_line_end;
use crate::types::{no_header_config, no_recon_init, vcf::recon_eol, DataType, DataTypeDef};

pub static DEF: DataTypeDef = DataTypeDef {
    data_type: DataType::Sam,
    name: "sam",
    extensions: &["sam"],
    header_line_prefix: Some(b'@'),
    header_required: false,
    header_config: no_header_config,
    concat_check,
    seg_init,
    seg_row,
    seg_finish: None,
    recon_init: no_recon_init,
    recon_row,
    specials: SPECIALS,
    last_record_end: last_line_end,
    count_rows: crate::types::count_lines,
    has_random_access: true,
    chrom_fp: Some(fp_rname),
};

static SPECIALS: &[SpecialFn] = &[];

/// Separators splitting a read name into compound items
const QNAME_SEPS: &[u8] = b":/-. ";

fn fp_qname() -> Fingerprint {
    Fingerprint::primary(b"QNAME")
}
fn fp_flag() -> Fingerprint {
    Fingerprint::primary(b"FLAG")
}
fn fp_rname() -> Fingerprint {
    Fingerprint::primary(b"RNAME")
}
fn fp_pos() -> Fingerprint {
    Fingerprint::primary(b"POS")
}
fn fp_mapq() -> Fingerprint {
    Fingerprint::primary(b"MAPQ")
}
fn fp_cigar() -> Fingerprint {
    Fingerprint::primary(b"CIGAR")
}
fn fp_rnext() -> Fingerprint {
    Fingerprint::primary(b"RNEXT")
}
fn fp_pnext() -> Fingerprint {
    Fingerprint::primary(b"PNEXT")
}
fn fp_tlen() -> Fingerprint {
    Fingerprint::primary(b"TLEN")
}
fn fp_seq() -> Fingerprint {
    Fingerprint::primary(b"SEQ")
}
fn fp_qual() -> Fingerprint {
    Fingerprint::primary(b"QUAL")
}
fn fp_optional() -> Fingerprint {
    Fingerprint::primary(b"OPTIONAL")
}
fn fp_eol() -> Fingerprint {
    Fingerprint::primary(b"EOL")
}

/// Concatenated alignment components must carry identical headers, or the
/// reference and read-group lines would be ambiguous
fn concat_check(first: &[u8], next: &[u8]) -> std::result::Result<(), String> {
    if first != next {
        return Err("SAM headers differ".to_string());
    }
    Ok(())
}

fn seg_init(s: &mut Seg<'_>) -> Result<()> {
    s.ctx(fp_qname(), LocalType::Text, 0)?;
    s.ctx(fp_flag(), LocalType::Text, 0)?;
    s.pos_ctx(fp_rname())?;
    s.pos_ctx(fp_pos())?;
    s.ctx(fp_mapq(), LocalType::Text, 0)?;
    s.ctx(fp_cigar(), LocalType::Text, 0)?;
    s.ctx(fp_rnext(), LocalType::Text, 0)?;
    s.ctx(fp_pnext(), LocalType::Text, 0)?;
    s.ctx(fp_tlen(), LocalType::Text, 0)?;
    s.ctx(fp_seq(), LocalType::Sequence, 0)?;
    s.ctx(fp_qual(), LocalType::Sequence, 0)?;
    s.ctx(fp_optional(), LocalType::Text, 0)?;
    s.ctx(fp_eol(), LocalType::Text, 0)?;
    Ok(())
}

fn seg_row(s: &mut Seg<'_>, text: &[u8]) -> Result<usize> {
    let row_len = memchr::memchr(b'\n', text).map_or(text.len(), |i| i + 1);
    let (content, eol) = chomp(&text[..row_len]);

    let mut pos = 0usize;
    let mut field = |s: &mut Seg<'_>, what: &'static str| -> Result<(usize, usize)> {
        let start = pos;
        let (token, sep) = next_item(content, &mut pos, b"\t");
        if token.is_empty() && sep == 0 && start >= content.len() {
            return Err(s.err_malformed(what, content));
        }
        Ok((start, start + token.len()))
    };

    let (a, b) = field(s, "a QNAME field")?;
    let qname_did = s.ctx(fp_qname(), LocalType::Text, 0)?;
    s.seg_compound(qname_did, &content[a..b], QNAME_SEPS, b - a + 1)?;

    let (a, b) = field(s, "a FLAG field")?;
    let flag_did = s.ctx(fp_flag(), LocalType::Text, 0)?;
    s.seg_value(flag_did, &content[a..b], b - a + 1)?;

    let (a, b) = field(s, "an RNAME field")?;
    let rname_did = s.pos_ctx(fp_rname())?;
    s.seg_chrom(rname_did, &content[a..b], b - a + 1)?;

    let (a, b) = field(s, "a POS field")?;
    let pos_did = s.pos_ctx(fp_pos())?;
    let position = s.seg_pos(pos_did, pos_did, &content[a..b], b - a + 1)?;
    s.ra_pos(position);

    let (a, b) = field(s, "a MAPQ field")?;
    let mapq_did = s.ctx(fp_mapq(), LocalType::Text, 0)?;
    s.seg_value(mapq_did, &content[a..b], b - a + 1)?;

    let (a, b) = field(s, "a CIGAR field")?;
    let cigar_did = s.ctx(fp_cigar(), LocalType::Text, 0)?;
    s.seg_value(cigar_did, &content[a..b], b - a + 1)?;

    let (a, b) = field(s, "an RNEXT field")?;
    let rnext_did = s.ctx(fp_rnext(), LocalType::Text, 0)?;
    s.seg_value(rnext_did, &content[a..b], b - a + 1)?;

    let (a, b) = field(s, "a PNEXT field")?;
    let pnext_did = s.ctx(fp_pnext(), LocalType::Text, 0)?;
    // PNEXT rides the POS delta chain; "0" (unavailable) stays literal
    if content[a..b] == *b"0" {
        s.seg_value(pnext_did, b"0", b - a + 1)?;
    } else {
        s.seg_pos(pnext_did, pos_did, &content[a..b], b - a + 1)?;
    }

    let (a, b) = field(s, "a TLEN field")?;
    let tlen_did = s.ctx(fp_tlen(), LocalType::Text, 0)?;
    s.seg_value(tlen_did, &content[a..b], b - a + 1)?;

    let (a, b) = field(s, "a SEQ field")?;
    let seq_did = s.ctx(fp_seq(), LocalType::Sequence, 0)?;
    if content[a..b] == *b"*" {
        s.seg_value(seq_did, b"*", b - a + 1)?;
    } else {
        s.seg_seq(seq_did, s.row_start + a as u32, (b - a) as u32, b - a + 1)?;
    }

    let (a, b) = field(s, "a QUAL field")?;
    let qual_did = s.ctx(fp_qual(), LocalType::Sequence, 0)?;
    if content[a..b] == *b"*" {
        s.seg_value(qual_did, b"*", b - a + 1)?;
    } else {
        s.seg_seq(qual_did, s.row_start + a as u32, (b - a) as u32, b - a + 1)?;
    }

    seg_optional(s, &content[pos.min(content.len())..], pos >= content.len())?;

    s.seg_eol(eol)?;
    Ok(row_len)
}

/// Optional fields: "NM:i:5\tMD:Z:10A5" expands through a template whose
/// items are keyed by tag and type, with "TAG:TYPE:" as the item prefix
fn seg_optional(s: &mut Seg<'_>, tail: &[u8], absent: bool) -> Result<()> {
    let optional_did = s.ctx(fp_optional(), LocalType::Text, 0)?;
    if absent {
        s.seg_missing(optional_did);
        return Ok(());
    }
    let mut template = TemplateBuilder::new();
    let mut pos = 0usize;
    loop {
        let (entry, sep) = next_item(tail, &mut pos, b"\t");
        // TAG:TYPE:VALUE - the name is "TAG:TYPE"
        let value_start = entry
            .iter()
            .enumerate()
            .filter(|&(_, &b)| b == b':')
            .nth(1)
            .map(|(i, _)| i + 1);
        let Some(value_start) = value_start else {
            return Err(s.err_malformed("an optional field of the form TAG:TYPE:VALUE", entry));
        };
        let name = &entry[..value_start - 1];
        let value = &entry[value_start..];
        let fingerprint = Fingerprint::type1(name);
        let sub_did = s.info_ctx(fingerprint)?;
        if value.is_empty() {
            s.seg_empty(sub_did);
        } else {
            s.seg_value(sub_did, value, value.len())?;
        }
        let mut prefix = name.to_vec();
        prefix.push(b':');
        template.item(
            fingerprint,
            if sep == 0 { snip::COMPOUND_NO_SEP } else { sep },
        );
        template.prefix(&prefix);
        if sep == 0 {
            break;
        }
    }
    let snip_bytes = template.build();
    s.seg_snip(optional_did, &snip_bytes, tail.len() + 1)
}

fn recon_row(r: &mut Recon<'_>) -> Result<()> {
    let qname_did = r.pctx(fp_qname());
    r.from_ctx(qname_did)?;
    r.emit(b"\t");

    let flag_did = r.pctx(fp_flag());
    r.from_ctx(flag_did)?;
    r.emit(b"\t");

    let rname_did = r.pctx(fp_rname());
    r.from_ctx(rname_did)?;
    let chrom_word = r.last_word;
    r.emit(b"\t");

    let pos_did = r.pctx(fp_pos());
    r.from_ctx(pos_did)?;
    let row_pos = r.pctxs[pos_did].last_value;
    r.emit(b"\t");

    for fp in [fp_mapq(), fp_cigar(), fp_rnext(), fp_pnext(), fp_tlen()] {
        let did = r.pctx(fp);
        r.from_ctx(did)?;
        r.emit(b"\t");
    }

    let seq_did = r.pctx(fp_seq());
    r.from_ctx(seq_did)?;
    r.emit(b"\t");

    let qual_did = r.pctx(fp_qual());
    r.from_ctx(qual_did)?;

    // optional fields: the tab before them drops when they are absent
    r.emit(b"\t");
    let before = r.out.len();
    let optional_did = r.pctx(fp_optional());
    if r.from_ctx(optional_did)? == ReconStatus::Missing {
        r.out.truncate(before - 1);
    }

    let eol_did = r.pctx(fp_eol());
    recon_eol(r, eol_did)?;

    if let Some(filter) = r.filter {
        if !filter.is_site_included(chrom_word, row_pos.max(0) as u64) {
            r.drop_row = true;
        }
    }
    Ok(())
}
