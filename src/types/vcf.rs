//! Variant-call data. Fixed columns CHROM..INFO feed one context each;
//! INFO is split into name-keyed subfields through an expansion template;
//! FORMAT names map the per-sample values onto genotype contexts. POS is
//! delta-encoded and drives the random-access index, and INFO END extends
//! the same delta chain (and the index range) so region filters catch
//! records whose span reaches into the region.

use crate::context::LocalType;
use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::recon::{Recon, ReconStatus, SpecialFn};
use crate::seg::{chomp, next_item, InfoVal, Seg, TemplateBuilder};
use crate::snip;
use crate::txt_io::last_line_end;
use crate::types::{no_recon_init, DataType, DataTypeDef};

pub static DEF: DataTypeDef = DataTypeDef {
    data_type: DataType::Vcf,
    name: "vcf",
    extensions: &["vcf"],
    header_line_prefix: Some(b'#'),
    header_required: true,
    header_config,
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
    chrom_fp: Some(fp_chrom),
};

static SPECIALS: &[SpecialFn] = &[];

fn fp_chrom() -> Fingerprint {
    Fingerprint::primary(b"CHROM")
}
fn fp_pos() -> Fingerprint {
    Fingerprint::primary(b"POS")
}
fn fp_id() -> Fingerprint {
    Fingerprint::primary(b"ID")
}
fn fp_refalt(which: &[u8]) -> Fingerprint {
    Fingerprint::primary(which)
}
fn fp_qual() -> Fingerprint {
    Fingerprint::primary(b"QUAL")
}
fn fp_filter() -> Fingerprint {
    Fingerprint::primary(b"FILTER")
}
fn fp_info() -> Fingerprint {
    Fingerprint::primary(b"INFO")
}
fn fp_format() -> Fingerprint {
    Fingerprint::primary(b"FORMAT")
}
fn fp_samples() -> Fingerprint {
    Fingerprint::primary(b"SAMPLES")
}
fn fp_eol() -> Fingerprint {
    Fingerprint::primary(b"EOL")
}

/// Declared sample count: columns beyond FORMAT on the #CHROM line
fn header_config(header: &[u8]) -> u64 {
    let Some(line) = chrom_line(header) else {
        return 0;
    };
    let columns = line.split(|&b| b == b'\t').count();
    columns.saturating_sub(9) as u64
}

/// The last header line (#CHROM ...), without its terminator
fn chrom_line(header: &[u8]) -> Option<&[u8]> {
    header
        .split(|&b| b == b'\n')
        .filter(|l| !l.is_empty())
        .last()
        .map(|l| chomp(l).0)
}

/// Concatenated variant-call components must agree on the sample columns
fn concat_check(first: &[u8], next: &[u8]) -> std::result::Result<(), String> {
    if chrom_line(first) != chrom_line(next) {
        return Err("sample columns of the #CHROM header line differ".to_string());
    }
    Ok(())
}

fn seg_init(s: &mut Seg<'_>) -> Result<()> {
    let chrom = s.pos_ctx(fp_chrom())?;
    debug_assert_eq!(chrom, 0);
    s.pos_ctx(fp_pos())?;
    s.ctx(fp_id(), LocalType::U32, 0)?;
    s.ctx(fp_refalt(b"REF"), LocalType::Text, 0)?;
    s.ctx(fp_refalt(b"ALT"), LocalType::Text, 0)?;
    s.ctx(fp_qual(), LocalType::Text, 0)?;
    s.ctx(fp_filter(), LocalType::Text, 0)?;
    s.ctx(fp_info(), LocalType::Text, 0)?;
    s.ctx(fp_eol(), LocalType::Text, 0)?;
    Ok(())
}

/// INFO subfields with special treatment: END joins the POS delta chain,
/// and the rounding whitelist applies when the user opted in
fn info_intercept(s: &mut Seg<'_>, name: &[u8], value: &[u8]) -> Result<InfoVal> {
    if name == b"END" {
        let pos_did = s.pos_ctx(fp_pos())?;
        let end_did = s.info_ctx(Fingerprint::type1(b"END"))?;
        let end = s.seg_pos(end_did, pos_did, value, value.len())?;
        s.ra_pos(end);
        return Ok(InfoVal::Segged);
    }
    if matches!(name, b"VQSLOD" | b"BaseQRankSum" | b"ReadPosRankSum") {
        if let Some((rounded, _)) = s.optimized(value) {
            return Ok(InfoVal::Replace(rounded));
        }
    }
    Ok(InfoVal::Plain)
}

/// FORMAT subfields whose values round when the user opted in
fn is_roundable_format(name: &[u8]) -> bool {
    matches!(name, b"GL" | b"GP" | b"PL")
}

fn seg_row(s: &mut Seg<'_>, text: &[u8]) -> Result<usize> {
    let row_len = memchr::memchr(b'\n', text).map_or(text.len(), |i| i + 1);
    let (content, eol) = chomp(&text[..row_len]);

    let mut pos = 0usize;
    let mut field = |s: &mut Seg<'_>, what: &'static str| -> Result<(usize, usize)> {
        let start = pos;
        let (token, sep) = next_item(content, &mut pos, b"\t");
        if token.is_empty() && sep == 0 && start >= content.len() {
            return Err(s.err_malformed(what, &content[content.len().saturating_sub(20)..]));
        }
        Ok((start, start + token.len()))
    };

    let (a, b) = field(s, "a CHROM field")?;
    s.seg_chrom(0, &content[a..b], b - a + 1)?;

    let (a, b) = field(s, "a POS field")?;
    let pos_did = s.pos_ctx(fp_pos())?;
    let position = s.seg_pos(pos_did, pos_did, &content[a..b], b - a + 1)?;
    s.ra_pos(position);

    let (a, b) = field(s, "an ID field")?;
    let id_did = s.ctx(fp_id(), LocalType::U32, 0)?;
    s.seg_id(id_did, &content[a..b], b - a + 1)?;

    for (name, what) in [
        (b"REF" as &[u8], "a REF field"),
        (b"ALT", "an ALT field"),
    ] {
        let (a, b) = field(s, what)?;
        let did = s.ctx(fp_refalt(name), LocalType::Text, 0)?;
        s.seg_value(did, &content[a..b], b - a + 1)?;
    }

    let (a, b) = field(s, "a QUAL field")?;
    let qual_did = s.ctx(fp_qual(), LocalType::Text, 0)?;
    s.seg_value(qual_did, &content[a..b], b - a + 1)?;

    let (a, b) = field(s, "a FILTER field")?;
    let filter_did = s.ctx(fp_filter(), LocalType::Text, 0)?;
    s.seg_value(filter_did, &content[a..b], b - a + 1)?;

    let (a, b) = field(s, "an INFO field")?;
    let info_did = s.ctx(fp_info(), LocalType::Text, 0)?;
    s.seg_info(info_did, &content[a..b], b - a + 1, Some(info_intercept))?;

    let n_samples = s.dt_config as usize;
    if n_samples > 0 {
        let (a, b) = field(s, "a FORMAT field")?;
        seg_samples(s, content, &mut pos, a, b)?;
    } else if pos < content.len() {
        return Err(s.err_malformed("no sample columns (none declared in header)", &content[pos..]));
    }

    s.seg_eol(eol)?;
    Ok(row_len)
}

/// Segment the FORMAT column and every sample column against it
fn seg_samples(
    s: &mut Seg<'_>,
    content: &[u8],
    pos: &mut usize,
    format_start: usize,
    format_end: usize,
) -> Result<()> {
    let format = &content[format_start..format_end];
    let format_did = s.ctx(fp_format(), LocalType::Text, 0)?;
    s.seg_value(format_did, format, format.len() + 1)?;

    // subfield contexts in FORMAT order
    let mut sub_dids = Vec::new();
    let mut sub_fps = Vec::new();
    let mut roundable = Vec::new();
    for name in format.split(|&b| b == b':') {
        let fp = Fingerprint::type1(name);
        sub_dids.push(s.genotype_ctx(fp)?);
        sub_fps.push(fp);
        roundable.push(is_roundable_format(name));
    }

    // sample columns: evaluate each subfield, missing trailing ones get
    // the reserved code so their ':' drops on reconstruction
    let mut n_samples = 0u32;
    while *pos < content.len() {
        let (sample, _) = next_item(content, pos, b"\t");
        let mut parts = sample.split(|&b| b == b':');
        for (i, &did) in sub_dids.iter().enumerate() {
            match parts.next() {
                None => s.seg_missing(did),
                Some(b"") => s.seg_empty(did),
                Some(value) => {
                    if roundable[i] {
                        if let Some((rounded, _)) = s.optimized(value) {
                            s.seg_value(did, &rounded, value.len() + 1)?;
                            continue;
                        }
                    }
                    s.seg_value(did, value, value.len() + 1)?;
                }
            }
        }
        if parts.next().is_some() {
            return Err(s.err_malformed("no more subfields than FORMAT declares", sample));
        }
        n_samples += 1;
    }

    // the per-row expansion template for all samples
    let mut template = TemplateBuilder::new();
    for (i, fp) in sub_fps.iter().enumerate() {
        let sep = if i + 1 < sub_fps.len() {
            b':'
        } else {
            snip::COMPOUND_NO_SEP
        };
        template.item(*fp, sep);
    }
    template.repeats(n_samples, b'\t');
    let samples_did = s.ctx(fp_samples(), LocalType::Text, 0)?;
    let snip_bytes = template.build();
    s.seg_snip(samples_did, &snip_bytes, n_samples as usize)
}

fn recon_row(r: &mut Recon<'_>) -> Result<()> {
    let chrom_did = r.pctx(fp_chrom());
    r.from_ctx(chrom_did)?;
    let chrom_word = r.last_word;
    r.emit(b"\t");

    let pos_did = r.pctx(fp_pos());
    r.from_ctx(pos_did)?;
    let row_pos = r.pctxs[pos_did].last_value;
    r.emit(b"\t");

    for fp in [
        fp_id(),
        fp_refalt(b"REF"),
        fp_refalt(b"ALT"),
        fp_qual(),
        fp_filter(),
    ] {
        let did = r.pctx(fp);
        r.from_ctx(did)?;
        r.emit(b"\t");
    }

    let info_did = r.pctx(fp_info());
    r.from_ctx(info_did)?;

    // sample columns are present when the block carries a FORMAT stream
    if !r.drop_genotypes {
        if let Some(format_did) = r.find_pctx(fp_format()) {
            r.emit(b"\t");
            r.from_ctx(format_did)?;
            r.emit(b"\t");
            let samples_did = r.pctx(fp_samples());
            r.from_ctx(samples_did)?;
        }
    }

    let eol_did = r.pctx(fp_eol());
    recon_eol(r, eol_did)?;

    // region filter: the row spans from POS to the furthest point END
    // reached (END advanced the POS chain during INFO reconstruction)
    if let Some(filter) = r.filter {
        let pos_after = r.pctxs[pos_did].last_value;
        let max = row_pos.max(pos_after).max(0) as u64;
        let min = row_pos.max(0) as u64;
        if !filter.range_overlaps(chrom_word, min, max) {
            r.drop_row = true;
        }
    }
    Ok(())
}

/// EOL contexts hold "\n", "\r\n" or the empty code for an unterminated
/// final row
pub(crate) fn recon_eol(r: &mut Recon<'_>, eol_did: usize) -> Result<()> {
    match r.from_ctx(eol_did)? {
        ReconStatus::Reconstructed | ReconStatus::Empty | ReconStatus::Missing => Ok(()),
    }
}
