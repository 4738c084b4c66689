//! The random-access index: one entry per (chromosome, block) stretch,
//! recording the position range the block covers so a region-filtered
//! decode can skip whole blocks. Entries are accumulated per block during
//! segmentation (chromosome references are still block-local then),
//! resolved to global word indices at merge, and appended to the archive
//! buffer; the section is written after the last component, sorted by
//! block index.

use byteorder::{ByteOrder, LittleEndian};
use bytemuck::{Pod, Zeroable};
use parking_lot::Mutex;

use crate::context::resolve_ref;
use crate::regions::RegionFilter;

/// One persisted random-access entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct RaEntry {
    chrom_word: [u8; 4],
    vblock_i: [u8; 4],
    min_pos: [u8; 8],
    max_pos: [u8; 8],
}

impl RaEntry {
    #[must_use]
    pub fn new(chrom_word: u32, vblock_i: u32, min_pos: u64, max_pos: u64) -> Self {
        let mut e = RaEntry::zeroed();
        LittleEndian::write_u32(&mut e.chrom_word, chrom_word);
        LittleEndian::write_u32(&mut e.vblock_i, vblock_i);
        LittleEndian::write_u64(&mut e.min_pos, min_pos);
        LittleEndian::write_u64(&mut e.max_pos, max_pos);
        e
    }

    #[must_use]
    pub fn chrom_word(&self) -> u32 {
        LittleEndian::read_u32(&self.chrom_word)
    }
    #[must_use]
    pub fn vblock_i(&self) -> u32 {
        LittleEndian::read_u32(&self.vblock_i)
    }
    #[must_use]
    pub fn min_pos(&self) -> u64 {
        LittleEndian::read_u64(&self.min_pos)
    }
    #[must_use]
    pub fn max_pos(&self) -> u64 {
        LittleEndian::read_u64(&self.max_pos)
    }
}

/// Per-block accumulation state. Within one block records are expected
/// sorted by chromosome; a change of chromosome closes the open entry, so
/// unsorted input simply emits multiple entries per block.
#[derive(Default)]
pub struct RaAccum {
    entries: Vec<(u32, u64, u64)>,
    open_chrom: Option<u32>,
}

impl RaAccum {
    pub fn clear(&mut self) {
        self.entries.clear();
        self.open_chrom = None;
    }

    /// A new row's chromosome (a block-local word reference)
    pub fn update_chrom(&mut self, chrom_ref: u32) {
        if self.open_chrom != Some(chrom_ref) {
            self.entries.push((chrom_ref, u64::MAX, 0));
            self.open_chrom = Some(chrom_ref);
        }
    }

    /// The current row's position (and any END-extension) widens the open
    /// entry's range
    pub fn update_pos(&mut self, pos: u64) {
        if let Some(last) = self.entries.last_mut() {
            last.1 = last.1.min(pos);
            last.2 = last.2.max(pos);
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve chromosome references through the chromosome context's merge
    /// map and emit final entries
    pub fn resolve(&self, vblock_i: u32, chrom_map: &[u32]) -> Vec<RaEntry> {
        self.entries
            .iter()
            .map(|&(chrom_ref, min, max)| {
                RaEntry::new(resolve_ref(chrom_ref, chrom_map), vblock_i, min, max)
            })
            .collect()
    }
}

/// The archive-wide buffer. Workers append resolved entries under this
/// mutex; the write path sorts by block index so entries are emitted in
/// block order regardless of merge timing.
#[derive(Default)]
pub struct RaBuf {
    entries: Mutex<Vec<RaEntry>>,
}

impl RaBuf {
    pub fn append(&self, mut entries: Vec<RaEntry>) {
        self.entries.lock().append(&mut entries);
    }

    /// Serialized payload of the random-access section
    #[must_use]
    pub fn to_payload(&self) -> Vec<u8> {
        let mut entries = self.entries.lock().clone();
        entries.sort_by_key(RaEntry::vblock_i);
        bytemuck::cast_slice(&entries).to_vec()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// The decode-side index
pub struct RaIndex {
    pub entries: Vec<RaEntry>,
}

impl RaIndex {
    #[must_use]
    pub fn from_payload(payload: &[u8]) -> Self {
        let entries = bytemuck::cast_slice(payload).to_vec();
        RaIndex { entries }
    }

    /// Block indices whose entries overlap the filter, in ascending order
    #[must_use]
    pub fn matching_blocks(&self, filter: &RegionFilter) -> Vec<u32> {
        let mut blocks: Vec<u32> = self
            .entries
            .iter()
            .filter(|e| filter.range_overlaps(e.chrom_word(), e.min_pos(), e.max_pos()))
            .map(RaEntry::vblock_i)
            .collect();
        blocks.dedup();
        blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accum_single_chrom() {
        let mut accum = RaAccum::default();
        accum.update_chrom(7);
        accum.update_pos(100);
        accum.update_chrom(7);
        accum.update_pos(101);
        let entries = accum.resolve(1, &[]);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0], RaEntry::new(7, 1, 100, 101));
    }

    #[test]
    fn test_accum_chrom_change_closes_entry() {
        let mut accum = RaAccum::default();
        accum.update_chrom(1);
        accum.update_pos(10);
        accum.update_chrom(2);
        accum.update_pos(5);
        accum.update_pos(20);
        let entries = accum.resolve(3, &[]);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], RaEntry::new(1, 3, 10, 10));
        assert_eq!(entries[1], RaEntry::new(2, 3, 5, 20));
    }

    #[test]
    fn test_end_field_widens_range() {
        let mut accum = RaAccum::default();
        accum.update_chrom(0);
        accum.update_pos(150);
        accum.update_pos(200); // INFO END
        let entries = accum.resolve(1, &[]);
        assert_eq!(entries[0].min_pos(), 150);
        assert_eq!(entries[0].max_pos(), 200);
    }

    #[test]
    fn test_payload_roundtrip_sorted() {
        let buf = RaBuf::default();
        buf.append(vec![RaEntry::new(0, 2, 5, 6)]);
        buf.append(vec![RaEntry::new(0, 1, 1, 2)]);
        let payload = buf.to_payload();
        let index = RaIndex::from_payload(&payload);
        assert_eq!(index.entries[0].vblock_i(), 1);
        assert_eq!(index.entries[1].vblock_i(), 2);
    }
}
