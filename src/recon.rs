//! The snip-driven reconstruction engine: the inverse of segmentation.
//! Each decode-side context carries iterator state over its b250 and local
//! streams; control codes at the start of dictionary snips route values
//! through deltas, local lookups, redirects, compound-template expansion
//! and data-type special handlers. Reconstruction appends to the block's
//! output buffer; row filters roll the buffer back to the row start.

use std::collections::HashMap;
use std::sync::Arc;

use crate::base250::{self, B250};
use crate::buffer::Buffer;
use crate::context::{deinterlace, LocalType, FL_STORE_VALUE};
use crate::error::{ReconError, Result};
use crate::fingerprint::Fingerprint;
use crate::regions::RegionFilter;
use crate::seg::parse_int;
use crate::snip;

/// A context's dictionary on the decode side, assembled from the archive's
/// dictionary fragments in file order (so word indices match the encoder).
#[derive(Default)]
pub struct PizDict {
    words: Vec<(u32, u32)>,
    bytes: Vec<u8>,
}

impl PizDict {
    /// Append one fragment: `num_words` words, each terminated by the
    /// separator byte.
    pub fn append_fragment(&mut self, payload: &[u8], num_words: usize) -> Result<()> {
        let base = self.bytes.len() as u32;
        self.bytes.extend_from_slice(payload);
        let mut start = base;
        let mut found = 0usize;
        for (i, &b) in payload.iter().enumerate() {
            if b == snip::SEP {
                self.words.push((start, base + i as u32 - start));
                start = base + i as u32 + 1;
                found += 1;
            }
        }
        if found != num_words {
            return Err(std::io::Error::other(format!(
                "dictionary fragment carries {found} words, header records {num_words}"
            ))
            .into());
        }
        Ok(())
    }

    #[must_use]
    pub fn word(&self, word_i: u32) -> Option<&[u8]> {
        let &(start, len) = self.words.get(word_i as usize)?;
        Some(&self.bytes[start as usize..(start + len) as usize])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Linear scan by value - used once per region spec to resolve
    /// chromosome names, never on a hot path
    #[must_use]
    pub fn find(&self, value: &[u8]) -> Option<u32> {
        (0..self.words.len() as u32).find(|&i| self.word(i) == Some(value))
    }
}

/// All dictionaries of an archive, keyed by fingerprint
#[derive(Default)]
pub struct DictSet {
    map: HashMap<u64, Arc<PizDict>>,
    empty: Arc<PizDict>,
}

impl DictSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_fragment(
        &mut self,
        fingerprint: Fingerprint,
        payload: &[u8],
        num_words: usize,
    ) -> Result<()> {
        let dict = self.map.entry(fingerprint.num()).or_default();
        Arc::get_mut(dict)
            .expect("dictionaries are loaded before blocks are decoded")
            .append_fragment(payload, num_words)
    }

    #[must_use]
    pub fn get(&self, fingerprint: Fingerprint) -> Arc<PizDict> {
        self.map
            .get(&fingerprint.num())
            .cloned()
            .unwrap_or_else(|| self.empty.clone())
    }
}

/// Decode-side context: shared dictionary plus this block's streams and
/// iterator state
pub struct PCtx {
    pub fingerprint: Fingerprint,
    pub name: String,
    pub dict: Arc<PizDict>,
    pub ltype: LocalType,
    pub flags: u8,

    pub b250: Vec<u8>,
    pub next_b250: usize,
    prev_word: Option<u32>,

    pub local: Vec<u8>,
    pub next_local: usize,

    pub last_value: i64,
    pub last_delta: i64,
}

impl PCtx {
    #[must_use]
    pub fn new(fingerprint: Fingerprint, dict: Arc<PizDict>) -> Self {
        PCtx {
            fingerprint,
            name: fingerprint.printable(),
            dict,
            ltype: LocalType::Text,
            flags: 0,
            b250: Vec::new(),
            next_b250: 0,
            prev_word: None,
            local: Vec::new(),
            next_local: 0,
            last_value: 0,
            last_delta: 0,
        }
    }
}

/// Outcome of reconstructing one reference
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconStatus {
    Reconstructed,
    /// Subfield present but empty - nothing emitted
    Empty,
    /// Subfield absent from this row - its separator is dropped too
    Missing,
}

pub type SpecialFn = fn(&mut Recon<'_>, did: usize, payload: &[u8]) -> Result<()>;

/// Per-block reconstruction state
pub struct Recon<'a> {
    pub vblock_i: u32,
    pub num_rows: u32,
    /// Absolute row index of the current row
    pub row_i: u64,
    pub out: Buffer,
    pub pctxs: Vec<PCtx>,
    pctx_map: HashMap<u64, usize>,
    pub dicts: &'a DictSet,
    pub specials: &'static [SpecialFn],

    // filters
    pub filter: Option<&'a RegionFilter>,
    pub grep: Option<&'a [u8]>,
    pub sequential: bool,
    pub drop_genotypes: bool,
    /// Set by a row parser (or filter) to roll the current row back
    pub drop_row: bool,

    /// Word index of the last b250 reference decoded - the chromosome
    /// word for region filtering
    pub last_word: u32,
    /// Sequence length carried between snips (FASTQ: QUAL reuses SEQ's)
    pub seq_len: i64,
    /// Carried across rows and blocks: is the current contig grepped out?
    pub contig_grepped_out: bool,
    /// Data-type scratch: the kind of the previous row (FASTA line state)
    pub prev_row_kind: u8,
}

impl<'a> Recon<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        vblock_i: u32,
        num_rows: u32,
        first_row: u64,
        dicts: &'a DictSet,
        specials: &'static [SpecialFn],
        filter: Option<&'a RegionFilter>,
        grep: Option<&'a [u8]>,
    ) -> Self {
        Recon {
            vblock_i,
            num_rows,
            row_i: first_row,
            out: Buffer::new("recon_data"),
            pctxs: Vec::new(),
            pctx_map: HashMap::new(),
            dicts,
            specials,
            filter,
            grep,
            sequential: false,
            drop_genotypes: false,
            drop_row: false,
            last_word: 0,
            seq_len: 0,
            contig_grepped_out: false,
            prev_row_kind: 0,
        }
    }

    /// Install a context decoded from one of the block's sections,
    /// applying the persisted local type and flags
    pub fn install_ctx(&mut self, fingerprint: Fingerprint, ltype: LocalType, flags: u8) -> usize {
        let did = self.pctx(fingerprint);
        self.pctxs[did].ltype = ltype;
        self.pctxs[did].flags = flags;
        did
    }

    pub fn set_b250(&mut self, did: usize, bytes: Vec<u8>) {
        self.pctxs[did].b250 = bytes;
    }

    pub fn set_local(&mut self, did: usize, bytes: Vec<u8>) {
        self.pctxs[did].local = bytes;
    }

    /// The context for `fingerprint`, created with empty streams if no
    /// section referenced it in this block
    pub fn pctx(&mut self, fingerprint: Fingerprint) -> usize {
        if let Some(&did) = self.pctx_map.get(&fingerprint.num()) {
            return did;
        }
        let pctx = PCtx::new(fingerprint, self.dicts.get(fingerprint));
        let did = self.pctxs.len();
        self.pctx_map.insert(fingerprint.num(), did);
        self.pctxs.push(pctx);
        did
    }

    #[must_use]
    pub fn find_pctx(&self, fingerprint: Fingerprint) -> Option<usize> {
        self.pctx_map.get(&fingerprint.num()).copied()
    }

    pub fn emit(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
    }

    pub fn emit_int(&mut self, value: i64) {
        let mut buf = itoa::Buffer::new();
        self.out.extend_from_slice(buf.format(value).as_bytes());
    }

    fn b250_overrun(&self, did: usize) -> ReconError {
        ReconError::B250Overrun {
            vblock_i: self.vblock_i,
            ctx: self.pctxs[did].name.clone(),
        }
    }

    fn local_overrun(&self, did: usize) -> ReconError {
        ReconError::LocalOverrun {
            vblock_i: self.vblock_i,
            ctx: self.pctxs[did].name.clone(),
        }
    }

    /// Reconstruct the next value of a context: consume one b250 reference
    /// if the context has a word stream, otherwise fall back to its local
    /// stream.
    pub fn from_ctx(&mut self, did: usize) -> Result<ReconStatus> {
        let vblock_i = self.vblock_i;
        if !self.pctxs[did].b250.is_empty() {
            if self.pctxs[did].next_b250 >= self.pctxs[did].b250.len() {
                return Err(self.b250_overrun(did).into());
            }
            let pctx = &mut self.pctxs[did];
            let element =
                base250::decode(&pctx.b250, &mut pctx.next_b250, vblock_i, &pctx.name)?;
            let word_i = match element {
                B250::Empty => return Ok(ReconStatus::Empty),
                B250::Missing => return Ok(ReconStatus::Missing),
                B250::Index(word_i) => word_i,
                B250::OneUp => match pctx.prev_word {
                    Some(prev) => prev + 1,
                    None => {
                        let ctx = pctx.name.clone();
                        return Err(ReconError::BadControlSnip {
                            vblock_i,
                            ctx,
                            code: base250::ONE_UP,
                        }
                        .into());
                    }
                },
            };
            pctx.prev_word = Some(word_i);
            let dict = pctx.dict.clone();
            self.last_word = word_i;
            let Some(snip_bytes) = dict.word(word_i) else {
                return Err(ReconError::BadWordIndex {
                    vblock_i,
                    ctx: self.pctxs[did].name.clone(),
                    word_i,
                    num_words: dict.len(),
                }
                .into());
            };
            self.one_snip(did, snip_bytes)?;
            Ok(ReconStatus::Reconstructed)
        } else if !self.pctxs[did].local.is_empty() {
            match self.pctxs[did].ltype {
                LocalType::Text => self.from_local_text(did, &[])?,
                LocalType::Sequence => {
                    let len = self.seq_len;
                    self.from_local_seq(did, len)?;
                }
                _ => {
                    self.from_local_int(did, &[])?;
                }
            }
            Ok(ReconStatus::Reconstructed)
        } else {
            Err(ReconError::EmptyContext {
                vblock_i,
                ctx: self.pctxs[did].name.clone(),
            }
            .into())
        }
    }

    /// Reconstruct one snip (literal or control sequence)
    pub fn one_snip(&mut self, did: usize, snip_bytes: &[u8]) -> Result<()> {
        if snip_bytes.is_empty() {
            return Ok(());
        }
        match snip_bytes[0] {
            snip::LOOKUP => self.lookup(did, &snip_bytes[1..]),
            snip::OTHER_LOOKUP => {
                let (fingerprint, rest) = self.read_fp(did, &snip_bytes[1..])?;
                let other = self.pctx(fingerprint);
                self.lookup(other, rest)
            }
            snip::SELF_DELTA => self.delta(did, did, &snip_bytes[1..]),
            snip::OTHER_DELTA => {
                let (fingerprint, rest) = self.read_fp(did, &snip_bytes[1..])?;
                let base = self.pctx(fingerprint);
                self.delta(did, base, rest)
            }
            snip::REDIRECT => {
                let (fingerprint, _) = self.read_fp(did, &snip_bytes[1..])?;
                let other = self.pctx(fingerprint);
                self.from_ctx(other)?;
                Ok(())
            }
            snip::SPECIAL => {
                if snip_bytes.len() < 2 {
                    return Err(self.bad_snip(did, snip::SPECIAL));
                }
                let handler = snip_bytes[1].wrapping_sub(b'0');
                let special =
                    self.specials
                        .get(handler as usize)
                        .ok_or(ReconError::UnknownSpecial {
                            vblock_i: self.vblock_i,
                            special: handler,
                        })?;
                special(self, did, &snip_bytes[2..])
            }
            snip::COMPOUND => self.expand_template(did, &snip_bytes[1..]),
            snip::DONT_STORE => {
                self.emit(&snip_bytes[1..]);
                Ok(())
            }
            // anything else is literal text - including "\n" and "\r\n"
            // end-of-line snips, which start below the control range
            _ => {
                self.emit(snip_bytes);
                let pctx = &mut self.pctxs[did];
                if pctx.flags & FL_STORE_VALUE != 0 {
                    if let Some(value) = parse_int(snip_bytes) {
                        pctx.last_value = value;
                    }
                }
                pctx.last_delta = 0;
                Ok(())
            }
        }
    }

    fn bad_snip(&self, did: usize, code: u8) -> crate::error::Error {
        ReconError::BadControlSnip {
            vblock_i: self.vblock_i,
            ctx: self.pctxs[did].name.clone(),
            code,
        }
        .into()
    }

    fn read_fp<'s>(&self, did: usize, snip_bytes: &'s [u8]) -> Result<(Fingerprint, &'s [u8])> {
        snip::read_fingerprint(snip_bytes)
            .ok_or_else(|| self.bad_snip(did, snip::OTHER_LOOKUP))
    }

    /// Lookup: the value lives in `base`'s local stream. For text the rest
    /// of the snip is a literal prefix; for sequences it is the length.
    fn lookup(&mut self, base: usize, rest: &[u8]) -> Result<()> {
        match self.pctxs[base].ltype {
            LocalType::Sequence => {
                let len = if rest.is_empty() {
                    self.seq_len
                } else {
                    parse_int(rest).ok_or_else(|| self.bad_snip(base, snip::LOOKUP))?
                };
                self.seq_len = len;
                self.from_local_seq(base, len)
            }
            LocalType::Text => self.from_local_text(base, rest),
            _ => {
                self.from_local_int(base, rest)?;
                Ok(())
            }
        }
    }

    fn delta(&mut self, did: usize, base: usize, rest: &[u8]) -> Result<()> {
        let delta = parse_int(rest).ok_or_else(|| self.bad_snip(did, snip::SELF_DELTA))?;
        let value = self.pctxs[base].last_value + delta;
        self.emit_int(value);
        self.pctxs[base].last_value = value;
        self.pctxs[did].last_delta = delta;
        Ok(())
    }

    /// Emit the next `\0`-terminated item of a local text stream,
    /// preceded by a literal prefix from the snip
    fn from_local_text(&mut self, did: usize, prefix: &[u8]) -> Result<()> {
        self.emit(prefix);
        let pctx = &self.pctxs[did];
        let start = pctx.next_local;
        let end = pctx.local[start..]
            .iter()
            .position(|&b| b == snip::SEP)
            .map(|i| start + i)
            .ok_or_else(|| self.local_overrun(did))?;
        let item_range = start..end;
        let pctx = &mut self.pctxs[did];
        pctx.next_local = end + 1;
        let item = pctx.local[item_range].to_vec();
        self.emit(&item);
        Ok(())
    }

    /// Emit the next fixed-width integer of a local stream as decimal,
    /// preceded by a literal prefix
    fn from_local_int(&mut self, did: usize, prefix: &[u8]) -> Result<i64> {
        self.emit(prefix);
        let pctx = &self.pctxs[did];
        let width = pctx.ltype.width();
        let start = pctx.next_local;
        if start + width > pctx.local.len() {
            return Err(self.local_overrun(did).into());
        }
        let mut raw = [0u8; 8];
        raw[..width].copy_from_slice(&pctx.local[start..start + width]);
        let unsigned = u64::from_le_bytes(raw);
        let value = if pctx.ltype.is_signed() {
            deinterlace(unsigned)
        } else {
            unsigned as i64
        };
        let pctx = &mut self.pctxs[did];
        pctx.next_local = start + width;
        pctx.last_value = value;
        self.emit_int(value);
        Ok(value)
    }

    /// Emit the next `len` bytes of a sequence local stream
    fn from_local_seq(&mut self, did: usize, len: i64) -> Result<()> {
        let pctx = &self.pctxs[did];
        let start = pctx.next_local;
        let end = start + len.max(0) as usize;
        if end > pctx.local.len() {
            return Err(self.local_overrun(did).into());
        }
        let pctx = &mut self.pctxs[did];
        pctx.next_local = end;
        // borrow juggling: take the stream while emitting from it
        let local = std::mem::take(&mut self.pctxs[did].local);
        self.emit(&local[start..end]);
        self.pctxs[did].local = local;
        Ok(())
    }

    /// Expand a compound template: repeats of (prefix, item, separator)
    fn expand_template(&mut self, did: usize, template: &[u8]) -> Result<()> {
        let parsed = Template::parse(template)
            .ok_or_else(|| self.bad_snip(did, snip::COMPOUND))?;
        for rep in 0..parsed.repeats {
            let mut last_sep_len = 0usize;
            for (item_i, &(fingerprint, sep)) in parsed.items.iter().enumerate() {
                let before_item = self.out.len();
                if let Some(prefix) = parsed.prefixes.as_ref().map(|p| &p[item_i]) {
                    self.emit(prefix);
                }
                let status = if fingerprint.is_none() {
                    ReconStatus::Empty
                } else {
                    let did = self.pctx(fingerprint);
                    self.from_ctx(did)?
                };
                if status == ReconStatus::Missing {
                    // drop this item's prefix and the separator that
                    // followed the previous item
                    self.out.truncate(before_item - last_sep_len);
                    last_sep_len = 0;
                    continue;
                }
                if sep != snip::COMPOUND_NO_SEP {
                    self.emit(&[sep]);
                    last_sep_len = 1;
                } else {
                    last_sep_len = 0;
                }
            }
            if parsed.rep_sep != snip::COMPOUND_NO_SEP && rep + 1 < parsed.repeats {
                self.emit(&[parsed.rep_sep]);
            }
        }
        Ok(())
    }
}

/// A parsed compound template
struct Template {
    items: Vec<(Fingerprint, u8)>,
    prefixes: Option<Vec<Vec<u8>>>,
    repeats: u32,
    rep_sep: u8,
}

impl Template {
    fn parse(template: &[u8]) -> Option<Template> {
        let num_items = template.first()?.checked_sub(b'0')? as usize;
        let mut pos = 1;
        let rep_start = pos;
        while pos < template.len() && template[pos] != b'|' {
            pos += 1;
        }
        let repeats: u32 = std::str::from_utf8(&template[rep_start..pos]).ok()?.parse().ok()?;
        pos += 1; // '|'
        let rep_sep = *template.get(pos)?;
        pos += 1;

        let mut items = Vec::with_capacity(num_items);
        for _ in 0..num_items {
            let fingerprint = Fingerprint::from_hex(template.get(pos..pos + 16)?)?;
            pos += 16;
            let sep = *template.get(pos)?;
            pos += 1;
            items.push((fingerprint, sep));
        }
        let prefixes = if template.get(pos) == Some(&snip::COMPOUND_PREFIX) {
            pos += 1;
            let mut prefixes = Vec::with_capacity(num_items);
            for _ in 0..num_items {
                let start = pos;
                while *template.get(pos)? != snip::COMPOUND_PREFIX_END {
                    pos += 1;
                }
                prefixes.push(template[start..pos].to_vec());
                pos += 1;
            }
            Some(prefixes)
        } else {
            None
        };
        Some(Template {
            items,
            prefixes,
            repeats,
            rep_sep,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dict_fragment_parsing() {
        let mut dict = PizDict::default();
        dict.append_fragment(b"chr1\0chr2\0", 2).unwrap();
        dict.append_fragment(b"chrX\0", 1).unwrap();
        assert_eq!(dict.word(0), Some(b"chr1" as &[u8]));
        assert_eq!(dict.word(2), Some(b"chrX" as &[u8]));
        assert_eq!(dict.find(b"chr2"), Some(1));
        assert_eq!(dict.find(b"chr9"), None);
        assert!(dict.word(3).is_none());
    }

    #[test]
    fn test_dict_fragment_word_count_check() {
        let mut dict = PizDict::default();
        assert!(dict.append_fragment(b"chr1\0", 2).is_err());
    }

    #[test]
    fn test_empty_word_in_dict() {
        let mut dict = PizDict::default();
        dict.append_fragment(b"\0a\0", 2).unwrap();
        assert_eq!(dict.word(0), Some(b"" as &[u8]));
        assert_eq!(dict.word(1), Some(b"a" as &[u8]));
    }
}
