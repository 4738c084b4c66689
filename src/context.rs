//! Per-field contexts: the aggregation structure for every value ever seen
//! for one field. The archive owns one global context per field
//! (dictionary, word records, hash, lock); each block owns a light local
//! context (new-value dictionary, local hash, word-reference stream, local
//! payload). Blocks segment against a read-only view of the global state
//! and merge their additions under the context's exclusive lock; the first
//! block ever to merge a context sorts its dictionary by descending
//! frequency so the most common values get the shortest b250 encoding.
//! This happens before any dictionary bytes are persisted and before any
//! other block can hold global indices, so strings never reorder after.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::base250;
use crate::error::{ContextError, HeaderError, Result};
use crate::fingerprint::Fingerprint;
use crate::hash::{hash_value, WordHash};
use crate::snip;

/// Hard cap on distinct contexts in one archive
pub const MAX_CTXS: usize = 1024;

/// Separator byte between dictionary words
pub const DICT_SEP: u8 = snip::SEP;

/// Context flags, persisted in section sub-headers
pub const FL_NO_SINGLETONS: u8 = 1 << 0;
pub const FL_STORE_VALUE: u8 = 1 << 1;
pub const FL_NO_ONE_UP: u8 = 1 << 2;

/// Word-reference NEW bit: the low bits index the block-local dictionary
const NEW_BIT: u32 = 0x8000_0000;
/// Reserved word references for subfield presence states
pub const WORD_MISSING: u32 = u32::MAX;
pub const WORD_EMPTY: u32 = u32::MAX - 1;

/// Bootstrap estimate of distinct values per block before the first merge
const BOOTSTRAP_ESTIMATE: usize = 512;

/// The kind of payload a context's local stream holds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum LocalType {
    #[default]
    Text = 0,
    Sequence = 1,
    U8 = 2,
    U16 = 3,
    U32 = 4,
    U64 = 5,
    I8 = 6,
    I16 = 7,
    I32 = 8,
    I64 = 9,
}

impl LocalType {
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(LocalType::Text),
            1 => Ok(LocalType::Sequence),
            2 => Ok(LocalType::U8),
            3 => Ok(LocalType::U16),
            4 => Ok(LocalType::U32),
            5 => Ok(LocalType::U64),
            6 => Ok(LocalType::I8),
            7 => Ok(LocalType::I16),
            8 => Ok(LocalType::I32),
            9 => Ok(LocalType::I64),
            _ => Err(HeaderError::UnknownLocalType(tag).into()),
        }
    }

    #[must_use]
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Fixed integer width in bytes, or 0 for text/sequence
    #[must_use]
    pub fn width(self) -> usize {
        match self {
            LocalType::Text | LocalType::Sequence => 0,
            LocalType::U8 | LocalType::I8 => 1,
            LocalType::U16 | LocalType::I16 => 2,
            LocalType::U32 | LocalType::I32 => 4,
            LocalType::U64 | LocalType::I64 => 8,
        }
    }

    #[must_use]
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            LocalType::I8 | LocalType::I16 | LocalType::I32 | LocalType::I64
        )
    }

    #[must_use]
    pub fn is_int(self) -> bool {
        self.width() > 0
    }
}

/// Signed values are interlaced so mixed-sign arrays stay small:
/// 0,-1,1,-2,2 ... <-> 0,1,2,3,4
#[must_use]
pub fn interlace(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

#[must_use]
pub fn deinterlace(u: u64) -> i64 {
    ((u >> 1) as i64) ^ -((u & 1) as i64)
}

/// One dictionary word of a global context
#[derive(Clone, Copy)]
pub struct ZWord {
    pub start: u32,
    pub len: u32,
    pub count: u32,
}

/// The archive-global side of a context
pub struct ZCtx {
    pub fingerprint: Fingerprint,
    pub name: String,
    pub dict: Vec<u8>,
    pub words: Vec<ZWord>,
    hash: WordHash,
    merged_once: bool,
    /// Hash saturated on pathological input; deduplication is degraded
    /// but the run continues
    degraded: bool,
    /// Words / bytes already written out as dictionary fragments
    pub persisted_words: usize,
    pub persisted_bytes: usize,
    /// Distinct new values contributed by the previous block, used to size
    /// the next block's local hash table
    prev_block_growth: usize,
}

impl ZCtx {
    fn new(fingerprint: Fingerprint) -> Self {
        ZCtx {
            fingerprint,
            name: fingerprint.printable(),
            dict: Vec::new(),
            words: Vec::new(),
            hash: WordHash::with_estimate(BOOTSTRAP_ESTIMATE),
            merged_once: false,
            degraded: false,
            persisted_words: 0,
            persisted_bytes: 0,
            prev_block_growth: BOOTSTRAP_ESTIMATE,
        }
    }

    #[must_use]
    pub fn word_bytes(&self, word_i: usize) -> &[u8] {
        let w = &self.words[word_i];
        &self.dict[w.start as usize..(w.start + w.len) as usize]
    }

    fn lookup(&self, value: &[u8]) -> Option<u32> {
        self.hash
            .get(hash_value(value), |w| self.word_bytes(w as usize) == value)
    }

    /// Append a word, returning its index. The dictionary grows by the
    /// word bytes plus the separator. A saturated hash leaves the word
    /// uncovered (later merges re-append duplicates, which still decode
    /// correctly) - pathological input warns and continues.
    fn append_word(&mut self, value: &[u8], count: u32) -> Result<u32> {
        if self.words.len() as u64 >= base250::MAX_WORD_INDEX as u64 {
            return Err(ContextError::TooManyWords(self.name.clone()).into());
        }
        if self.dict.len() as u64 + value.len() as u64 + 1 > u32::MAX as u64 {
            return Err(ContextError::DictOverflow(self.name.clone()).into());
        }
        let word_i = self.words.len() as u32;
        self.words.push(ZWord {
            start: self.dict.len() as u32,
            len: value.len() as u32,
            count,
        });
        self.dict.extend_from_slice(value);
        self.dict.push(DICT_SEP);
        if !self.hash.insert(hash_value(value), word_i) && !self.degraded {
            eprintln!(
                "seqzip: context {}: hash probing limit exceeded (pathological value distribution) - deduplication degraded",
                self.name
            );
            self.degraded = true;
        }
        Ok(word_i)
    }

    fn get_or_append_word(&mut self, value: &[u8], count: u32) -> Result<u32> {
        if let Some(w) = self.lookup(value) {
            self.words[w as usize].count += count;
            Ok(w)
        } else {
            self.append_word(value, count)
        }
    }

    /// Unpersisted dictionary fragment: (bytes, word count). Empty when the
    /// component added nothing to this context.
    #[must_use]
    pub fn fragment(&self) -> (&[u8], usize) {
        (
            &self.dict[self.persisted_bytes..],
            self.words.len() - self.persisted_words,
        )
    }

    pub fn mark_persisted(&mut self) {
        self.persisted_bytes = self.dict.len();
        self.persisted_words = self.words.len();
    }
}

/// The archive's pool of global contexts. Blocks refer to a context by its
/// dense index in this pool rather than by pointer. Primary-field contexts
/// exist before workers start; subfield contexts appear mid-file, so the
/// pool grows under its own lock while workers hold shared references.
#[derive(Default)]
pub struct CtxPool {
    ctxs: RwLock<Vec<Arc<RwLock<ZCtx>>>>,
    index: RwLock<HashMap<u64, usize>>,
}

impl CtxPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, zctx_i: usize) -> Arc<RwLock<ZCtx>> {
        self.ctxs.read()[zctx_i].clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ctxs.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn find(&self, fingerprint: Fingerprint) -> Option<usize> {
        self.index.read().get(&fingerprint.num()).copied()
    }

    /// Index of the context for `fingerprint`, creating it on first sight.
    /// Creation is rare; the pool only ever grows.
    pub fn get_or_create(&self, fingerprint: Fingerprint) -> Result<usize> {
        if let Some(i) = self.find(fingerprint) {
            return Ok(i);
        }
        let mut index = self.index.write();
        if let Some(&i) = index.get(&fingerprint.num()) {
            return Ok(i);
        }
        let mut ctxs = self.ctxs.write();
        if ctxs.len() >= MAX_CTXS {
            return Err(ContextError::TooManyContexts(MAX_CTXS).into());
        }
        let i = ctxs.len();
        ctxs.push(Arc::new(RwLock::new(ZCtx::new(fingerprint))));
        index.insert(fingerprint.num(), i);
        Ok(i)
    }

    /// Estimate of distinct values the next block will add
    #[must_use]
    pub fn growth_estimate(&self, zctx_i: usize) -> usize {
        self.get(zctx_i).read().prev_block_growth
    }

    /// Iterate context indices in creation order
    pub fn indices(&self) -> std::ops::Range<usize> {
        0..self.len()
    }
}

/// The block-local side of a context
pub struct VCtx {
    pub fingerprint: Fingerprint,
    pub name: String,
    pub zctx_i: usize,
    pub ltype: LocalType,
    pub flags: u8,

    /// Per-row word references, in row order; rewritten to global indices
    /// at merge, then encoded to b250
    pub word_refs: Vec<u32>,

    // values first seen in this block
    local_dict: Vec<u8>,
    local_words: Vec<(u32, u32)>,
    local_counts: Vec<u32>,
    local_hash: WordHash,

    /// Local payload: text items, fixed-width integers or sequence bytes
    pub local: Vec<u8>,
    /// Sequence payloads referenced as spans into the block text instead
    /// of being copied here
    pub local_spans: Vec<(u32, u32)>,
    /// Set when `local` holds merge-externalized singletons
    singletons_in_local: bool,
    /// Hash saturated on pathological input; values fall back to the
    /// local stream (or to an unhashed dictionary) for the rest of the
    /// block
    degraded: bool,
    /// Cached reference to the lookup snip used by degraded storage
    degraded_lookup_ref: Option<u32>,

    /// b250 encoding of `word_refs`, generated after merge
    pub b250: Vec<u8>,

    // per-block scratch
    pub last_value: i64,
    pub has_last_value: bool,
    pub last_delta: i64,
    pub txt_len: u64,
}

impl VCtx {
    pub fn new(
        fingerprint: Fingerprint,
        zctx_i: usize,
        estimate: usize,
        ltype: LocalType,
        flags: u8,
    ) -> Self {
        VCtx {
            fingerprint,
            name: fingerprint.printable(),
            zctx_i,
            ltype,
            flags,
            word_refs: Vec::new(),
            local_dict: Vec::new(),
            local_words: Vec::new(),
            local_counts: Vec::new(),
            local_hash: WordHash::with_estimate(estimate),
            local: Vec::new(),
            local_spans: Vec::new(),
            singletons_in_local: false,
            degraded: false,
            degraded_lookup_ref: None,
            b250: Vec::new(),
            last_value: 0,
            has_last_value: false,
            last_delta: 0,
            txt_len: 0,
        }
    }

    fn local_word_bytes(&self, i: usize) -> &[u8] {
        let (start, len) = self.local_words[i];
        &self.local_dict[start as usize..(start + len) as usize]
    }

    /// Classify a value: local hash, then the global hash under a shared
    /// lock, then append to the block-local dictionary. Returns the word
    /// reference (NEW bit set for block-local words).
    pub fn evaluate(&mut self, zctx: &RwLock<ZCtx>, value: &[u8]) -> Result<u32> {
        if self.degraded {
            return self.evaluate_degraded(zctx, value);
        }
        let hash = hash_value(value);
        if let Some(local_i) = self
            .local_hash
            .get(hash, |w| self.local_word_bytes(w as usize) == value)
        {
            self.local_counts[local_i as usize] += 1;
            return Ok(NEW_BIT | local_i);
        }
        {
            let z = zctx.read();
            if let Some(word_i) = z.lookup(value) {
                return Ok(word_i);
            }
        }
        let local_i = self.append_local_word(value)?;
        if !self.local_hash.insert(hash, local_i) {
            // pathological value distribution: warn and keep going with
            // the rest of the block stored locally
            eprintln!(
                "seqzip: context {}: hash probing limit exceeded (pathological value distribution) - storing values locally",
                self.name
            );
            self.degraded = true;
            self.flags |= FL_NO_SINGLETONS;
        }
        Ok(NEW_BIT | local_i)
    }

    fn append_local_word(&mut self, value: &[u8]) -> Result<u32> {
        let local_i = self.local_words.len() as u32;
        if local_i as u64 >= base250::MAX_WORD_INDEX as u64 {
            return Err(ContextError::TooManyWords(self.name.clone()).into());
        }
        self.local_words
            .push((self.local_dict.len() as u32, value.len() as u32));
        self.local_counts.push(1);
        self.local_dict.extend_from_slice(value);
        Ok(local_i)
    }

    /// All-local mode after hash saturation: each value's bytes go to the
    /// local stream and its word reference is the shared lookup snip.
    /// Contexts whose local stream holds another payload keep growing the
    /// dictionary unhashed instead - duplicates collapse at merge, which
    /// matches by bytes.
    fn evaluate_degraded(&mut self, zctx: &RwLock<ZCtx>, value: &[u8]) -> Result<u32> {
        let all_local_ok = self.ltype == LocalType::Text
            && self.local_spans.is_empty()
            && (self.local.is_empty() || self.singletons_in_local);
        if !all_local_ok {
            return Ok(NEW_BIT | self.append_local_word(value)?);
        }
        self.local.extend_from_slice(value);
        self.local.push(DICT_SEP);
        self.singletons_in_local = true;
        if let Some(word_ref) = self.degraded_lookup_ref {
            if word_ref & NEW_BIT != 0 {
                self.local_counts[(word_ref & !NEW_BIT) as usize] += 1;
            }
            return Ok(word_ref);
        }
        let global = {
            let z = zctx.read();
            z.lookup(&[snip::LOOKUP])
        };
        let word_ref = match global {
            Some(word_i) => word_i,
            None => NEW_BIT | self.append_local_word(&[snip::LOOKUP])?,
        };
        self.degraded_lookup_ref = Some(word_ref);
        Ok(word_ref)
    }

    /// Evaluate and append the reference to the word stream
    pub fn add_value(&mut self, zctx: &RwLock<ZCtx>, value: &[u8]) -> Result<()> {
        let word_ref = self.evaluate(zctx, value)?;
        self.word_refs.push(word_ref);
        Ok(())
    }

    pub fn add_empty(&mut self) {
        self.word_refs.push(WORD_EMPTY);
    }

    pub fn add_missing(&mut self) {
        self.word_refs.push(WORD_MISSING);
    }

    /// Append a text item to the local stream
    pub fn store_local_text(&mut self, bytes: &[u8]) {
        debug_assert_eq!(self.ltype, LocalType::Text);
        debug_assert!(!self.singletons_in_local);
        self.local.extend_from_slice(bytes);
        self.local.push(DICT_SEP);
    }

    /// Append a fixed-width integer to the local stream
    pub fn store_local_int(&mut self, value: i64) {
        let width = self.ltype.width();
        debug_assert!(width > 0);
        let raw = if self.ltype.is_signed() {
            interlace(value)
        } else {
            value as u64
        };
        self.local.extend_from_slice(&raw.to_le_bytes()[..width]);
    }

    /// Record a sequence payload as a span into the block text
    pub fn store_local_span(&mut self, start: u32, len: u32) {
        debug_assert_eq!(self.ltype, LocalType::Sequence);
        self.local_spans.push((start, len));
    }

    #[must_use]
    pub fn local_len(&self) -> u64 {
        self.local.len() as u64
            + self
                .local_spans
                .iter()
                .map(|&(_, len)| len as u64)
                .sum::<u64>()
    }

    #[must_use]
    pub fn is_unused(&self) -> bool {
        self.word_refs.is_empty() && self.local.is_empty() && self.local_spans.is_empty()
    }

    /// Merge this block's additions into the global context under its
    /// exclusive lock and rewrite the word-reference stream to global
    /// indices. Returns the local-to-global map so the caller can resolve
    /// references held elsewhere (the random-access buffer).
    pub fn merge_into_global(&mut self, zctx: &RwLock<ZCtx>) -> Result<Vec<u32>> {
        let map = {
            let mut z = zctx.write();
            self.merge_map(&mut z)?
        };
        for word_ref in &mut self.word_refs {
            *word_ref = resolve_ref(*word_ref, &map);
        }
        Ok(map)
    }

    fn merge_map(&mut self, z: &mut ZCtx) -> Result<Vec<u32>> {
        let num_local = self.local_words.len();
        let mut map = vec![0u32; num_local];

        if !z.merged_once {
            // first block to touch this context: install everything, then
            // sort by descending count so frequent values get short codes.
            // No other block can hold global indices yet - indices only
            // become visible through a merge.
            z.merged_once = true;
            for i in 0..num_local {
                let (start, len) = self.local_words[i];
                let bytes = &self.local_dict[start as usize..(start + len) as usize];
                map[i] = z.get_or_append_word(bytes, self.local_counts[i])?;
            }
            let order = sort_words_by_count(z);
            for m in &mut map {
                *m = order[*m as usize];
            }
        } else {
            let singleton_ok = self.flags & FL_NO_SINGLETONS == 0
                && self.ltype == LocalType::Text
                && self.local_spans.is_empty()
                && (self.local.is_empty() || self.singletons_in_local);
            for i in 0..num_local {
                let (start, len) = self.local_words[i];
                let range = start as usize..(start + len) as usize;
                if let Some(word_i) = z.lookup(&self.local_dict[range.clone()]) {
                    z.words[word_i as usize].count += self.local_counts[i];
                    map[i] = word_i;
                } else if singleton_ok && self.local_counts[i] == 1 {
                    // externalize the singleton: its bytes go to the local
                    // stream and its b250 slot references the shared
                    // lookup snip. Appending here preserves row order
                    // because a singleton occurs exactly once.
                    map[i] = z.get_or_append_word(&[snip::LOOKUP], 1)?;
                    let bytes = self.local_dict[range].to_vec();
                    self.local.extend_from_slice(&bytes);
                    self.local.push(DICT_SEP);
                    self.singletons_in_local = true;
                } else {
                    let bytes = &self.local_dict[range];
                    map[i] = z.append_word(bytes, self.local_counts[i])?;
                }
            }
        }

        z.prev_block_growth = num_local.max(16);
        Ok(map)
    }

    /// Encode the merged word references as b250 bytes
    pub fn generate_b250(&mut self) {
        let allow_one_up = self.flags & FL_NO_ONE_UP == 0;
        let mut prev = None;
        self.b250.reserve(self.word_refs.len());
        for &word_ref in &self.word_refs {
            match word_ref {
                WORD_EMPTY => {
                    base250::encode_code(base250::EMPTY, &mut self.b250);
                    prev = None;
                }
                WORD_MISSING => {
                    base250::encode_code(base250::MISSING, &mut self.b250);
                    prev = None;
                }
                index => {
                    debug_assert_eq!(index & NEW_BIT, 0, "unmerged word reference");
                    base250::encode(index, prev, allow_one_up, &mut self.b250);
                    prev = Some(index);
                }
            }
        }
    }
}

/// Resolve a word reference through a merge map
#[must_use]
pub fn resolve_ref(word_ref: u32, map: &[u32]) -> u32 {
    if word_ref == WORD_EMPTY || word_ref == WORD_MISSING {
        word_ref
    } else if word_ref & NEW_BIT != 0 {
        map[(word_ref & !NEW_BIT) as usize]
    } else {
        word_ref
    }
}

/// Sort a freshly merged dictionary by descending count (stable, so ties
/// keep first-appearance order), rebuilding dict bytes and hash. Returns
/// old-index -> new-index.
fn sort_words_by_count(z: &mut ZCtx) -> Vec<u32> {
    let mut order: Vec<usize> = (0..z.words.len()).collect();
    order.sort_by(|&a, &b| z.words[b].count.cmp(&z.words[a].count).then(a.cmp(&b)));

    let mut old_to_new = vec![0u32; z.words.len()];
    let mut new_dict = Vec::with_capacity(z.dict.len());
    let mut new_words = Vec::with_capacity(z.words.len());
    let mut new_hash = WordHash::with_estimate(z.words.len());
    for (new_i, &old_i) in order.iter().enumerate() {
        old_to_new[old_i] = new_i as u32;
        let bytes = z.word_bytes(old_i).to_vec();
        new_words.push(ZWord {
            start: new_dict.len() as u32,
            len: bytes.len() as u32,
            count: z.words[old_i].count,
        });
        new_hash.insert(hash_value(&bytes), new_i as u32);
        new_dict.extend_from_slice(&bytes);
        new_dict.push(DICT_SEP);
    }
    z.dict = new_dict;
    z.words = new_words;
    z.hash = new_hash;
    old_to_new
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_pair() -> (RwLock<ZCtx>, VCtx) {
        let fp = Fingerprint::primary(b"CHROM");
        let zctx = RwLock::new(ZCtx::new(fp));
        let vctx = VCtx::new(fp, 0, 64, LocalType::Text, 0);
        (zctx, vctx)
    }

    #[test]
    fn test_evaluate_dedups_within_block() {
        let (zctx, mut vctx) = make_pair();
        let a = vctx.evaluate(&zctx, b"chr1").unwrap();
        let b = vctx.evaluate(&zctx, b"chr1").unwrap();
        let c = vctx.evaluate(&zctx, b"chr2").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a & NEW_BIT != 0);
    }

    #[test]
    fn test_first_merge_sorts_by_frequency() {
        let (zctx, mut vctx) = make_pair();
        // chr2 x3, chr1 x1 - chr2 must get index 0
        for value in [b"chr1" as &[u8], b"chr2", b"chr2", b"chr2"] {
            vctx.add_value(&zctx, value).unwrap();
        }
        vctx.merge_into_global(&zctx).unwrap();
        let z = zctx.read();
        assert_eq!(z.word_bytes(0), b"chr2");
        assert_eq!(z.word_bytes(1), b"chr1");
        assert_eq!(vctx.word_refs, vec![1, 0, 0, 0]);
    }

    #[test]
    fn test_second_block_reuses_global_words() {
        let (zctx, mut vb1) = make_pair();
        vb1.add_value(&zctx, b"chr1").unwrap();
        vb1.add_value(&zctx, b"chr1").unwrap();
        vb1.merge_into_global(&zctx).unwrap();

        let fp = Fingerprint::primary(b"CHROM");
        let mut vb2 = VCtx::new(fp, 0, 64, LocalType::Text, FL_NO_SINGLETONS);
        // global hit resolves without the NEW bit
        let word_ref = vb2.evaluate(&zctx, b"chr1").unwrap();
        assert_eq!(word_ref & NEW_BIT, 0);
        vb2.word_refs.push(word_ref);
        vb2.add_value(&zctx, b"chr9").unwrap();
        vb2.merge_into_global(&zctx).unwrap();

        let z = zctx.read();
        assert_eq!(z.words.len(), 2);
        assert_eq!(vb2.word_refs, vec![0, 1]);
        // appended after the sorted prefix, never reordered
        assert_eq!(z.word_bytes(1), b"chr9");
    }

    #[test]
    fn test_singleton_externalized_on_later_blocks() {
        let (zctx, mut vb1) = make_pair();
        vb1.add_value(&zctx, b"common").unwrap();
        vb1.merge_into_global(&zctx).unwrap();

        let fp = Fingerprint::primary(b"CHROM");
        let mut vb2 = VCtx::new(fp, 0, 64, LocalType::Text, 0);
        vb2.add_value(&zctx, b"unique-id-123").unwrap();
        vb2.merge_into_global(&zctx).unwrap();

        // the unique value went to local, and b250 references the lookup snip
        assert_eq!(vb2.local, b"unique-id-123\0");
        let z = zctx.read();
        let lookup_word = vb2.word_refs[0] as usize;
        assert_eq!(z.word_bytes(lookup_word), &[snip::LOOKUP]);
    }

    #[test]
    fn test_no_singletons_flag_respected() {
        let (zctx, mut vb1) = make_pair();
        vb1.add_value(&zctx, b"common").unwrap();
        vb1.merge_into_global(&zctx).unwrap();

        let fp = Fingerprint::primary(b"CHROM");
        let mut vb2 = VCtx::new(fp, 0, 64, LocalType::Text, FL_NO_SINGLETONS);
        vb2.add_value(&zctx, b"chrUn_KI270302v1").unwrap();
        vb2.merge_into_global(&zctx).unwrap();

        assert!(vb2.local.is_empty());
        let z = zctx.read();
        assert_eq!(z.word_bytes(vb2.word_refs[0] as usize), b"chrUn_KI270302v1");
    }

    #[test]
    fn test_b250_generation_with_one_up() {
        let (zctx, mut vctx) = make_pair();
        vctx.flags = FL_NO_SINGLETONS;
        for value in [b"a" as &[u8], b"b", b"c"] {
            vctx.add_value(&zctx, value).unwrap();
            vctx.add_value(&zctx, value).unwrap();
        }
        vctx.merge_into_global(&zctx).unwrap();
        vctx.generate_b250();
        // all counts tie, stable sort keeps appearance order: a=0,b=1,c=2
        // refs: 0 0 1 1 2 2 -> 0, rep, one-up? (1 = 0+1) etc.
        let mut pos = 0;
        let mut decoded = Vec::new();
        while pos < vctx.b250.len() {
            decoded.push(base250::decode(&vctx.b250, &mut pos, 1, "T").unwrap());
        }
        assert_eq!(decoded.len(), 6);
        assert_eq!(decoded[0], base250::B250::Index(0));
        assert_eq!(decoded[2], base250::B250::OneUp);
    }

    #[test]
    fn test_degraded_context_stores_values_locally() {
        let (zctx, mut vctx) = make_pair();
        vctx.add_value(&zctx, b"common").unwrap();
        // simulate hash saturation mid-block
        vctx.degraded = true;
        vctx.flags |= FL_NO_SINGLETONS;
        vctx.add_value(&zctx, b"one").unwrap();
        vctx.add_value(&zctx, b"two").unwrap();
        vctx.merge_into_global(&zctx).unwrap();

        // degraded values live in the local stream, in row order
        assert_eq!(vctx.local, b"one\0two\0");
        // their word references share the lookup snip
        assert_eq!(vctx.word_refs[1], vctx.word_refs[2]);
        let z = zctx.read();
        assert_eq!(z.word_bytes(vctx.word_refs[1] as usize), &[snip::LOOKUP]);
        assert_eq!(z.word_bytes(vctx.word_refs[0] as usize), b"common");
    }

    #[test]
    fn test_degraded_non_text_context_keeps_growing_dictionary() {
        let fp = Fingerprint::primary(b"ID");
        let zctx = RwLock::new(ZCtx::new(fp));
        let mut vctx = VCtx::new(fp, 0, 64, LocalType::U32, 0);
        vctx.degraded = true;
        vctx.add_value(&zctx, b"\x01rs").unwrap();
        vctx.add_value(&zctx, b"\x01rs").unwrap();
        vctx.merge_into_global(&zctx).unwrap();

        // duplicates collapse at merge, which matches by bytes
        assert_eq!(vctx.word_refs[0], vctx.word_refs[1]);
        let z = zctx.read();
        assert_eq!(z.word_bytes(vctx.word_refs[0] as usize), b"\x01rs");
    }

    #[test]
    fn test_interlace_roundtrip() {
        for v in [0i64, 1, -1, 2, -5, i64::MAX / 2, i64::MIN / 2] {
            assert_eq!(deinterlace(interlace(v)), v);
        }
        assert_eq!(interlace(2), 4);
        assert_eq!(interlace(-5), 9);
    }

    #[test]
    fn test_dict_fragments_track_persistence() {
        let (zctx, mut vctx) = make_pair();
        vctx.add_value(&zctx, b"chr1").unwrap();
        vctx.merge_into_global(&zctx).unwrap();
        {
            let mut z = zctx.write();
            let (bytes, words) = z.fragment();
            assert_eq!(bytes, b"chr1\0");
            assert_eq!(words, 1);
            z.mark_persisted();
            let (bytes, words) = z.fragment();
            assert!(bytes.is_empty());
            assert_eq!(words, 0);
        }
    }

    #[test]
    fn test_ctx_pool_dense_indices() {
        let mut pool = CtxPool::new();
        let a = pool.get_or_create(Fingerprint::primary(b"CHROM")).unwrap();
        let b = pool.get_or_create(Fingerprint::primary(b"POS")).unwrap();
        let a2 = pool.get_or_create(Fingerprint::primary(b"CHROM")).unwrap();
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(pool.len(), 2);
    }
}
