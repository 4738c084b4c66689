//! Personal-genotype exports (rsid, chromosome, position, genotype). The
//! rsid keeps its prefix in the dictionary with the number in a
//! fixed-width local stream; chromosome and position feed the
//! random-access index; the one- or two-letter genotype call is a
//! dictionary value.

use crate::context::LocalType;
use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::recon::{Recon, SpecialFn};
use crate::seg::{chomp, next_item, Seg};
use crate::txt_io::last_line_end;
use crate::types::{
    no_concat_check, no_header_config, no_recon_init, vcf::recon_eol, DataType, DataTypeDef,
};

pub static DEF: DataTypeDef = DataTypeDef {
    data_type: DataType::Me23,
    name: "23andMe",
    extensions: &["txt", "me23"],
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
    chrom_fp: Some(fp_chrom),
};

static SPECIALS: &[SpecialFn] = &[];

fn fp_id() -> Fingerprint {
    Fingerprint::primary(b"ID")
}
fn fp_chrom() -> Fingerprint {
    Fingerprint::primary(b"CHROM")
}
fn fp_pos() -> Fingerprint {
    Fingerprint::primary(b"POS")
}
fn fp_genotype() -> Fingerprint {
    Fingerprint::primary(b"GT")
}
fn fp_eol() -> Fingerprint {
    Fingerprint::primary(b"EOL")
}

fn seg_init(s: &mut Seg<'_>) -> Result<()> {
    s.ctx(fp_id(), LocalType::U32, 0)?;
    s.pos_ctx(fp_chrom())?;
    s.pos_ctx(fp_pos())?;
    s.ctx(fp_genotype(), LocalType::Text, 0)?;
    s.ctx(fp_eol(), LocalType::Text, 0)?;
    Ok(())
}

fn seg_row(s: &mut Seg<'_>, text: &[u8]) -> Result<usize> {
    let row_len = memchr::memchr(b'\n', text).map_or(text.len(), |i| i + 1);
    let (content, eol) = chomp(&text[..row_len]);

    let mut pos = 0usize;
    let (rsid, _) = next_item(content, &mut pos, b"\t");
    let (chrom, _) = next_item(content, &mut pos, b"\t");
    let (position, _) = next_item(content, &mut pos, b"\t");
    let (genotype, extra) = next_item(content, &mut pos, b"\t");
    if genotype.is_empty() || extra != 0 {
        return Err(s.err_malformed("four tab-separated fields", content));
    }
    if genotype.len() > 2 {
        return Err(s.err_malformed("a one or two character genotype", genotype));
    }

    let id_did = s.ctx(fp_id(), LocalType::U32, 0)?;
    s.seg_id(id_did, rsid, rsid.len() + 1)?;

    let chrom_did = s.pos_ctx(fp_chrom())?;
    s.seg_chrom(chrom_did, chrom, chrom.len() + 1)?;

    let pos_did = s.pos_ctx(fp_pos())?;
    let p = s.seg_pos(pos_did, pos_did, position, position.len() + 1)?;
    s.ra_pos(p);

    let genotype_did = s.ctx(fp_genotype(), LocalType::Text, 0)?;
    s.seg_value(genotype_did, genotype, genotype.len())?;

    s.seg_eol(eol)?;
    Ok(row_len)
}

fn recon_row(r: &mut Recon<'_>) -> Result<()> {
    let id_did = r.pctx(fp_id());
    r.from_ctx(id_did)?;
    r.emit(b"\t");

    let chrom_did = r.pctx(fp_chrom());
    r.from_ctx(chrom_did)?;
    let chrom_word = r.last_word;
    r.emit(b"\t");

    let pos_did = r.pctx(fp_pos());
    r.from_ctx(pos_did)?;
    let row_pos = r.pctxs[pos_did].last_value;
    r.emit(b"\t");

    let genotype_did = r.pctx(fp_genotype());
    r.from_ctx(genotype_did)?;

    let eol_did = r.pctx(fp_eol());
    recon_eol(r, eol_did)?;

    if let Some(filter) = r.filter {
        if !filter.is_site_included(chrom_word, row_pos.max(0) as u64) {
            r.drop_row = true;
        }
    }
    Ok(())
}
