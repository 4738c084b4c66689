//! Shared segmentation primitives. Each data type's row parser drives
//! these: one-field dictionary evaluation, position deltas feeding the
//! random-access index, compound templates, info-style name=value fields,
//! local text/integer/sequence stores, and end-of-line handling that
//! preserves Windows line endings byte-exactly.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::context::{CtxPool, LocalType, VCtx, ZCtx, FL_NO_ONE_UP, FL_NO_SINGLETONS, FL_STORE_VALUE};
use crate::error::{Error, Result, SegError};
use crate::fingerprint::Fingerprint;
use crate::snip;
use crate::types::DataTypeDef;
use crate::vblock::VBlock;

/// End-of-line form of one row
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Eol {
    /// Last row of the input without a terminator
    None,
    Nl,
    CrNl,
}

impl Eol {
    #[must_use]
    pub fn bytes(self) -> &'static [u8] {
        match self {
            Eol::None => b"",
            Eol::Nl => b"\n",
            Eol::CrNl => b"\r\n",
        }
    }

    #[must_use]
    pub fn len(self) -> usize {
        self.bytes().len()
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self == Eol::None
    }
}

/// Strip the line terminator off a row, reporting which form it had
#[must_use]
pub fn chomp(row: &[u8]) -> (&[u8], Eol) {
    match row {
        [.., b'\r', b'\n'] => (&row[..row.len() - 2], Eol::CrNl),
        [.., b'\n'] => (&row[..row.len() - 1], Eol::Nl),
        _ => (row, Eol::None),
    }
}

/// Next token up to (and consuming) any of `stops`, or to the end.
/// Returns the token and the stop byte found (0 at end of text).
pub fn next_item<'t>(text: &'t [u8], pos: &mut usize, stops: &[u8]) -> (&'t [u8], u8) {
    let start = *pos;
    while *pos < text.len() {
        let b = text[*pos];
        if stops.contains(&b) {
            let token = &text[start..*pos];
            *pos += 1;
            return (token, b);
        }
        *pos += 1;
    }
    (&text[start..], 0)
}

/// Fast decimal integer parse; rejects empty, sign-only and overflow
#[must_use]
pub fn parse_int(bytes: &[u8]) -> Option<i64> {
    let (neg, digits) = match bytes {
        [b'-', rest @ ..] => (true, rest),
        _ => (false, bytes),
    };
    if digits.is_empty() || digits.len() > 18 {
        return None;
    }
    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value * 10 + (b - b'0') as i64;
    }
    Some(if neg { -value } else { value })
}

/// Opt-in numeric rounding to two significant digits. Returns false (and
/// leaves `out` untouched) when the value is not a plain finite number -
/// the original bytes are then kept.
pub fn round_2_sig(value: &[u8], out: &mut Vec<u8>) -> bool {
    let Ok(text) = std::str::from_utf8(value) else {
        return false;
    };
    let Ok(number) = text.parse::<f64>() else {
        return false;
    };
    if !number.is_finite() || text.contains(['e', 'E', 'x', 'X']) {
        return false;
    }
    if number == 0.0 {
        out.extend_from_slice(b"0");
        return true;
    }
    let magnitude = number.abs().log10().floor() as i32;
    let decimals = (1 - magnitude).max(0) as usize;
    let rounded = format!("{number:.decimals$}");
    out.extend_from_slice(rounded.as_bytes());
    true
}

/// Template builder for compound and info-style fields. The template is
/// itself a snip stored in the parent context's dictionary; identical row
/// shapes collapse to one dictionary word.
pub struct TemplateBuilder {
    items: Vec<(Fingerprint, u8)>,
    prefixes: Option<Vec<Vec<u8>>>,
    repeats: u32,
    rep_sep: u8,
}

impl Default for TemplateBuilder {
    fn default() -> Self {
        TemplateBuilder {
            items: Vec::new(),
            prefixes: None,
            repeats: 1,
            rep_sep: snip::COMPOUND_NO_SEP,
        }
    }
}

impl TemplateBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item: the sub-context it reconstructs from (NONE for a
    /// prefix-only item) and the separator following it (COMPOUND_NO_SEP
    /// for none)
    pub fn item(&mut self, fingerprint: Fingerprint, sep_after: u8) -> &mut Self {
        self.items.push((fingerprint, sep_after));
        self
    }

    pub fn prefix(&mut self, prefix: &[u8]) -> &mut Self {
        self.prefixes
            .get_or_insert_with(Vec::new)
            .push(prefix.to_vec());
        self
    }

    pub fn repeats(&mut self, repeats: u32, rep_sep: u8) -> &mut Self {
        self.repeats = repeats;
        self.rep_sep = rep_sep;
        self
    }

    #[must_use]
    pub fn num_items(&self) -> usize {
        self.items.len()
    }

    pub fn build(&self) -> Vec<u8> {
        debug_assert!(self.items.len() <= MAX_TEMPLATE_ITEMS);
        let mut template = vec![snip::COMPOUND, b'0' + self.items.len() as u8];
        let mut buf = itoa::Buffer::new();
        template.extend_from_slice(buf.format(self.repeats).as_bytes());
        template.push(b'|');
        template.push(self.rep_sep);
        for (fingerprint, sep) in &self.items {
            template.extend_from_slice(&fingerprint.to_hex());
            template.push(*sep);
        }
        if let Some(prefixes) = &self.prefixes {
            debug_assert_eq!(prefixes.len(), self.items.len());
            template.push(snip::COMPOUND_PREFIX);
            for prefix in prefixes {
                template.extend_from_slice(prefix);
                template.push(snip::COMPOUND_PREFIX_END);
            }
        }
        template
    }
}

/// Items beyond this fold into the final item
pub const MAX_TEMPLATE_ITEMS: usize = 30;

/// Index characters naming compound sub-contexts by position
const ITEM_CHARS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRST";

/// Name of a compound item's sub-context: first letter of the parent,
/// the position character, then the rest of the parent name
#[must_use]
pub fn item_fingerprint(parent: &str, item_i: usize) -> Fingerprint {
    let parent = parent.as_bytes();
    let mut name = Vec::with_capacity(parent.len() + 1);
    name.push(parent[0]);
    name.push(ITEM_CHARS[item_i]);
    name.extend_from_slice(&parent[1..]);
    Fingerprint::type2(&name)
}

/// What the info-field intercept decided for one name=value entry
pub enum InfoVal {
    /// Evaluate the value into the item context as usual
    Plain,
    /// The intercept already segmented the value into the item context
    Segged,
    /// Evaluate this replacement instead of the original value
    Replace(Vec<u8>),
}

pub type InfoInterceptFn =
    fn(&mut Seg<'_>, name: &[u8], value: &[u8]) -> Result<InfoVal>;

/// Per-block segmentation state handed to the data-type row parsers
pub struct Seg<'a> {
    pub vb: &'a mut VBlock,
    pub pool: &'a CtxPool,
    pub txt: &'a [u8],
    pub path: &'a Path,
    pub dt: &'static DataTypeDef,
    /// Absolute row index of the current row, for error messages
    pub row_i: u64,
    /// Offset of the current row in the block text
    pub row_start: u32,
    pub optimize: bool,
    /// Opaque per-component configuration from the text header
    pub dt_config: u64,
    /// Data-type scratch: the kind of the previous row (FASTA line state)
    pub prev_row_kind: u8,
    scratch: Vec<u8>,
}

impl<'a> Seg<'a> {
    pub fn zctx(&self, did: usize) -> Arc<RwLock<ZCtx>> {
        self.pool.get(self.vb.vctxs[did].zctx_i)
    }

    pub fn ctx(&mut self, fingerprint: Fingerprint, ltype: LocalType, flags: u8) -> Result<usize> {
        self.vb.ctx_with(self.pool, fingerprint, ltype, flags)
    }

    /// The context of a position-like field: stores its numeric value and
    /// keeps stable indices for random access
    pub fn pos_ctx(&mut self, fingerprint: Fingerprint) -> Result<usize> {
        self.ctx(
            fingerprint,
            LocalType::Text,
            FL_STORE_VALUE | FL_NO_SINGLETONS,
        )
    }

    /// A genotype-data context: one-up disabled because its stream holds
    /// all samples' values interleaved and trailing missing subfields make
    /// decode non-sequential
    pub fn genotype_ctx(&mut self, fingerprint: Fingerprint) -> Result<usize> {
        self.ctx(fingerprint, LocalType::Text, FL_NO_ONE_UP)
    }

    pub fn err_malformed(&self, expected: &'static str, found: &[u8]) -> Error {
        SegError::MalformedLine {
            path: self.path.to_path_buf(),
            data_type: self.dt.name,
            vblock_i: self.vb.vblock_i,
            line_i: self.row_i,
            expected,
            found: String::from_utf8_lossy(&found[..found.len().min(40)]).into_owned(),
        }
        .into()
    }

    /// One-field primitive: evaluate the value and append its reference
    pub fn seg_value(&mut self, did: usize, value: &[u8], add_bytes: usize) -> Result<()> {
        let zctx = self.zctx(did);
        let vctx = &mut self.vb.vctxs[did];
        vctx.add_value(&zctx, value)?;
        vctx.txt_len += add_bytes as u64;
        Ok(())
    }

    /// A control snip is stored the same way as a value
    pub fn seg_snip(&mut self, did: usize, snip_bytes: &[u8], add_bytes: usize) -> Result<()> {
        self.seg_value(did, snip_bytes, add_bytes)
    }

    pub fn seg_empty(&mut self, did: usize) {
        self.vb.vctxs[did].add_empty();
    }

    pub fn seg_missing(&mut self, did: usize) {
        self.vb.vctxs[did].add_missing();
    }

    /// End-of-line context: "\n", "\r\n", or nothing for an unterminated
    /// final row (preserved on round trip)
    pub fn seg_eol(&mut self, eol: Eol) -> Result<()> {
        let did = self.ctx(Fingerprint::primary(b"EOL"), LocalType::Text, 0)?;
        if eol.is_empty() {
            self.seg_empty(did);
            Ok(())
        } else {
            self.seg_value(did, eol.bytes(), eol.len())
        }
    }

    /// Position primitive: delta against the base context's previous
    /// value (the same context for POS, another for END/PNEXT), updating
    /// the base value so later deltas chain. Returns the parsed position.
    pub fn seg_pos(
        &mut self,
        did: usize,
        base_did: usize,
        value: &[u8],
        add_bytes: usize,
    ) -> Result<i64> {
        let Some(pos) = parse_int(value) else {
            return Err(self.err_malformed("a numeric position", value));
        };
        let base = &self.vb.vctxs[base_did];
        let snip_bytes = if base.has_last_value {
            let delta = pos - base.last_value;
            if did == base_did {
                snip::self_delta(delta)
            } else {
                snip::other_delta(base.fingerprint, delta)
            }
        } else {
            value.to_vec()
        };
        self.seg_snip(did, &snip_bytes, add_bytes)?;
        let base = &mut self.vb.vctxs[base_did];
        base.last_value = pos;
        base.has_last_value = true;
        Ok(pos)
    }

    /// Identifier primitive: a value with a numeric tail ("rs12345") keeps
    /// its prefix in the dictionary and sends the number to a fixed-width
    /// local stream; other values go to the dictionary whole.
    pub fn seg_id(&mut self, did: usize, value: &[u8], add_bytes: usize) -> Result<()> {
        let digits_start = value
            .iter()
            .rposition(|b| !b.is_ascii_digit())
            .map_or(0, |i| i + 1);
        let digits = &value[digits_start..];
        // leading zeros would not round-trip through an integer
        let numeric = !digits.is_empty() && digits.len() <= 9 && digits[0] != b'0';
        if numeric {
            let number: i64 = parse_int(digits).expect("checked digits");
            let mut snip_bytes = vec![snip::LOOKUP];
            snip_bytes.extend_from_slice(&value[..digits_start]);
            self.seg_snip(did, &snip_bytes, add_bytes)?;
            self.vb.vctxs[did].store_local_int(number);
        } else {
            self.seg_value(did, value, add_bytes)?;
        }
        Ok(())
    }

    /// Local-text primitive: the value goes to the local stream; the b250
    /// stream holds nothing (callers reference this context with a lookup
    /// or redirect snip from another context)
    pub fn seg_local_text(&mut self, did: usize, value: &[u8], add_bytes: usize) {
        let vctx = &mut self.vb.vctxs[did];
        vctx.store_local_text(value);
        vctx.txt_len += add_bytes as u64;
    }

    /// Sequence primitive: payload bytes stay in the block text and are
    /// compressed from their spans; the b250 stream records a lookup snip
    /// carrying the length
    pub fn seg_seq(&mut self, did: usize, start: u32, len: u32, add_bytes: usize) -> Result<()> {
        let snip_bytes = snip::lookup_with_len(len as usize);
        self.seg_snip(did, &snip_bytes, add_bytes)?;
        self.vb.vctxs[did].store_local_span(start, len);
        Ok(())
    }

    /// Compound primitive: split a structured value on `seps`, store each
    /// token in a positional sub-context and the shape as a template snip
    pub fn seg_compound(
        &mut self,
        did: usize,
        value: &[u8],
        seps: &[u8],
        add_bytes: usize,
    ) -> Result<()> {
        let parent = self.vb.vctxs[did].name.clone();
        let mut template = TemplateBuilder::new();
        let mut pos = 0;
        let mut item_i = 0;
        loop {
            let (token, sep) = if item_i == MAX_TEMPLATE_ITEMS - 1 {
                // the final item swallows the remainder
                let token = &value[pos..];
                pos = value.len();
                (token, 0u8)
            } else {
                next_item(value, &mut pos, seps)
            };
            let fingerprint = item_fingerprint(&parent, item_i);
            let sub_did = self.ctx(fingerprint, LocalType::Text, 0)?;
            if token.is_empty() {
                self.seg_empty(sub_did);
            } else {
                self.seg_value(sub_did, token, token.len())?;
            }
            template.item(
                fingerprint,
                if sep == 0 { snip::COMPOUND_NO_SEP } else { sep },
            );
            item_i += 1;
            if pos >= value.len() && sep == 0 {
                break;
            }
            if pos >= value.len() {
                // value ended exactly on a separator: an empty final token
                let fingerprint = item_fingerprint(&parent, item_i);
                let sub_did = self.ctx(fingerprint, LocalType::Text, 0)?;
                self.seg_empty(sub_did);
                template.item(fingerprint, snip::COMPOUND_NO_SEP);
                break;
            }
        }
        let snip_bytes = template.build();
        // separators are accounted to the parent; tokens to the items
        self.seg_snip(did, &snip_bytes, add_bytes.saturating_sub(value.len()))
    }

    /// Info-style primitive: a self-describing "name1=value1;name2=value2"
    /// field. The ordered name list becomes a template snip in the parent
    /// context; each value goes to a context keyed by its name. An empty
    /// value ("AC=") is distinguished from an absent one by the EMPTY
    /// reference code.
    pub fn seg_info(
        &mut self,
        did: usize,
        value: &[u8],
        add_bytes: usize,
        intercept: Option<InfoInterceptFn>,
    ) -> Result<()> {
        let mut template = TemplateBuilder::new();
        let mut pos = 0;
        while pos < value.len() {
            let (entry, entry_sep) = next_item(value, &mut pos, b";");
            match entry.iter().position(|&b| b == b'=') {
                Some(eq) => {
                    let (name, entry_value) = (&entry[..eq], &entry[eq + 1..]);
                    let fingerprint = Fingerprint::type1(name);
                    let sub_did = self.info_ctx(fingerprint)?;
                    let action = match intercept {
                        Some(intercept) => intercept(self, name, entry_value)?,
                        None => InfoVal::Plain,
                    };
                    match action {
                        InfoVal::Segged => {}
                        InfoVal::Plain => {
                            if entry_value.is_empty() {
                                self.seg_empty(sub_did);
                            } else {
                                self.seg_value(sub_did, entry_value, entry_value.len())?;
                            }
                        }
                        InfoVal::Replace(replacement) => {
                            self.seg_value(sub_did, &replacement, replacement.len())?;
                        }
                    }
                    let mut prefix = name.to_vec();
                    prefix.push(b'=');
                    template.item(fingerprint, snip::COMPOUND_NO_SEP);
                    template.prefix(&prefix);
                }
                None => {
                    // valueless flag entry: prefix only, no sub-context
                    template.item(Fingerprint::NONE, snip::COMPOUND_NO_SEP);
                    template.prefix(entry);
                }
            }
            // the ';' separator follows every entry except the last
            let last = template.num_items() - 1;
            if pos < value.len() {
                template.items_set_sep(last, b';');
            } else if entry_sep == b';' {
                // a trailing ';' closes the field with an empty entry
                template.items_set_sep(last, b';');
                template.item(Fingerprint::NONE, snip::COMPOUND_NO_SEP);
                template.prefix(b"");
            }
        }
        let snip_bytes = template.build();
        self.seg_snip(did, &snip_bytes, add_bytes)
    }

    /// A name-keyed info subfield context
    pub fn info_ctx(&mut self, fingerprint: Fingerprint) -> Result<usize> {
        self.ctx(fingerprint, LocalType::Text, 0)
    }

    /// Rounding applied to whitelisted numeric fields when the user opted
    /// in; returns the replacement and the saved byte count
    pub fn optimized(&mut self, value: &[u8]) -> Option<(Vec<u8>, usize)> {
        if !self.optimize {
            return None;
        }
        self.scratch.clear();
        let mut rounded = std::mem::take(&mut self.scratch);
        if round_2_sig(value, &mut rounded) && rounded.len() <= value.len() {
            let saved = value.len() - rounded.len();
            self.vb.txt_savings += saved as u64;
            Some((rounded, saved))
        } else {
            self.scratch = rounded;
            None
        }
    }

    pub fn ra_chrom(&mut self, chrom_ref: u32) {
        self.vb.ra.update_chrom(chrom_ref);
    }

    pub fn ra_pos(&mut self, pos: i64) {
        if pos >= 0 {
            self.vb.ra.update_pos(pos as u64);
        }
    }

    /// Evaluate a chromosome value, feed random access, and append it
    pub fn seg_chrom(&mut self, did: usize, value: &[u8], add_bytes: usize) -> Result<()> {
        let zctx = self.zctx(did);
        let vctx = &mut self.vb.vctxs[did];
        let chrom_ref = vctx.evaluate(&zctx, value)?;
        vctx.word_refs.push(chrom_ref);
        vctx.txt_len += add_bytes as u64;
        self.vb.ra.update_chrom(chrom_ref);
        self.vb.ra_chrom_did = Some(did);
        Ok(())
    }
}

impl TemplateBuilder {
    /// Change the separator of an already added item
    pub fn items_set_sep(&mut self, item_i: usize, sep: u8) {
        self.items[item_i].1 = sep;
    }
}

/// Drive a block's segmentation: split rows, call the data type's row
/// parser, track the row directory and longest row.
pub fn seg_block(
    vb: &mut VBlock,
    pool: &CtxPool,
    def: &'static DataTypeDef,
    path: &Path,
    optimize: bool,
    dt_config: u64,
) -> Result<()> {
    let txt = std::mem::take(&mut vb.txt);
    let result = seg_block_inner(vb, pool, def, path, optimize, dt_config, &txt);
    vb.txt = txt;
    result
}

#[allow(clippy::too_many_arguments)]
fn seg_block_inner(
    vb: &mut VBlock,
    pool: &CtxPool,
    def: &'static DataTypeDef,
    path: &Path,
    optimize: bool,
    dt_config: u64,
    txt: &[u8],
) -> Result<()> {
    let first_row = vb.first_row;
    let mut seg = Seg {
        vb,
        pool,
        txt,
        path,
        dt: def,
        row_i: first_row,
        row_start: 0,
        optimize,
        dt_config,
        prev_row_kind: u8::MAX,
        scratch: Vec::new(),
    };
    (def.seg_init)(&mut seg)?;

    let mut pos = 0usize;
    while pos < txt.len() {
        seg.row_start = pos as u32;
        seg.vb.rows.push(pos as u32);
        let consumed = (def.seg_row)(&mut seg, &txt[pos..])?;
        debug_assert!(consumed > 0, "row parser consumed nothing");
        seg.vb.longest_row = seg.vb.longest_row.max(consumed as u32);
        pos += consumed;
        seg.row_i += 1;
    }
    if let Some(finish) = def.seg_finish {
        finish(&mut seg)?;
    }
    let rows = seg.vb.rows.len() as u32;
    vb.num_rows = rows;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chomp_forms() {
        assert_eq!(chomp(b"abc\n"), (b"abc" as &[u8], Eol::Nl));
        assert_eq!(chomp(b"abc\r\n"), (b"abc" as &[u8], Eol::CrNl));
        assert_eq!(chomp(b"abc"), (b"abc" as &[u8], Eol::None));
        assert_eq!(chomp(b"\n"), (b"" as &[u8], Eol::Nl));
    }

    #[test]
    fn test_next_item() {
        let text = b"a\tbb\tccc";
        let mut pos = 0;
        assert_eq!(next_item(text, &mut pos, b"\t"), (b"a" as &[u8], b'\t'));
        assert_eq!(next_item(text, &mut pos, b"\t"), (b"bb" as &[u8], b'\t'));
        assert_eq!(next_item(text, &mut pos, b"\t"), (b"ccc" as &[u8], 0));
        assert_eq!(pos, text.len());
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int(b"0"), Some(0));
        assert_eq!(parse_int(b"100"), Some(100));
        assert_eq!(parse_int(b"-42"), Some(-42));
        assert_eq!(parse_int(b""), None);
        assert_eq!(parse_int(b"-"), None);
        assert_eq!(parse_int(b"12x"), None);
        assert_eq!(parse_int(b"99999999999999999999"), None);
    }

    #[test]
    fn test_round_2_sig() {
        let cases: &[(&[u8], &str)] = &[
            (b"-10.12341", "-10"),
            (b"0.0001234", "0.00012"),
            (b"1.25", "1.2"),
            (b"123.456", "123"),
            (b"0", "0"),
        ];
        for (input, expected) in cases {
            let mut out = Vec::new();
            assert!(round_2_sig(input, &mut out), "{input:?}");
            assert_eq!(std::str::from_utf8(&out).unwrap(), *expected, "{input:?}");
        }
        let mut out = Vec::new();
        assert!(!round_2_sig(b"abc", &mut out));
        assert!(!round_2_sig(b"1e5", &mut out));
    }

    #[test]
    fn test_item_fingerprint_positions() {
        let a = item_fingerprint("DESC", 0);
        let b = item_fingerprint("DESC", 1);
        assert_eq!(a.printable(), "D0ESC");
        assert_eq!(b.printable(), "D1ESC");
        assert_ne!(a, b);
    }
}
