//! Open-addressing hash tables mapping field values to dictionary word
//! indices. One global table per context (shared across blocks, guarded by
//! the context lock) and one local table per block context (lock-free,
//! block-private). Both use xxh3 with a secondary-hash probe step to avoid
//! clustering; capacities are powers of two. The table stores (hash, word)
//! pairs; a positive lookup is confirmed by comparing the dictionary bytes
//! of the candidate word. Probe-cap saturation is a signal, not an error:
//! the owning context degrades to local storage and the run continues.

use xxhash_rust::xxh3::xxh3_64;

const EMPTY: u32 = u32::MAX;

/// Probes beyond this signal a pathological value distribution
const MAX_PROBES: usize = 1024;

/// Hash of a value's bytes, shared by global and local tables so a value
/// hashes identically in both
#[inline]
#[must_use]
pub fn hash_value(bytes: &[u8]) -> u64 {
    xxh3_64(bytes)
}

pub struct WordHash {
    hashes: Vec<u64>,
    words: Vec<u32>,
    mask: usize,
    len: usize,
}

impl WordHash {
    /// Create a table with room for roughly `estimate` entries. The
    /// estimate comes from the previous block's dictionary growth; the
    /// bootstrap constant is chosen by the caller.
    #[must_use]
    pub fn with_estimate(estimate: usize) -> Self {
        let cap = (estimate * 2).next_power_of_two().max(64);
        WordHash {
            hashes: vec![0; cap],
            words: vec![EMPTY; cap],
            mask: cap - 1,
            len: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Probe step derived from the upper hash bits; odd so the probe
    /// sequence cycles the whole power-of-two table
    #[inline]
    fn step(hash: u64) -> usize {
        ((hash >> 32) as usize) | 1
    }

    /// Look up a value by its hash. `eq` confirms a candidate word by
    /// comparing dictionary bytes.
    pub fn get(&self, hash: u64, mut eq: impl FnMut(u32) -> bool) -> Option<u32> {
        let mut slot = hash as usize & self.mask;
        let step = Self::step(hash);
        for _ in 0..=self.mask.min(MAX_PROBES) {
            let word = self.words[slot];
            if word == EMPTY {
                return None;
            }
            if self.hashes[slot] == hash && eq(word) {
                return Some(word);
            }
            slot = (slot + step) & self.mask;
        }
        None
    }

    /// Insert a (hash, word) pair. The caller guarantees the value is not
    /// already present. Returns false if the probe cap is exceeded even
    /// after growth - pathological input the caller degrades on; the word
    /// is then simply not covered by the table.
    pub fn insert(&mut self, hash: u64, word: u32) -> bool {
        if (self.len + 1) * 10 >= (self.mask + 1) * 7 {
            self.grow();
        }
        if !self.insert_inner(hash, word) {
            self.grow();
            if !self.insert_inner(hash, word) {
                return false;
            }
        }
        self.len += 1;
        true
    }

    fn insert_inner(&mut self, hash: u64, word: u32) -> bool {
        let mut slot = hash as usize & self.mask;
        let step = Self::step(hash);
        for _ in 0..=self.mask.min(MAX_PROBES) {
            if self.words[slot] == EMPTY {
                self.hashes[slot] = hash;
                self.words[slot] = word;
                return true;
            }
            slot = (slot + step) & self.mask;
        }
        false
    }

    fn grow(&mut self) {
        let new_cap = (self.mask + 1) * 2;
        let old_hashes = std::mem::replace(&mut self.hashes, vec![0; new_cap]);
        let old_words = std::mem::replace(&mut self.words, vec![EMPTY; new_cap]);
        self.mask = new_cap - 1;
        for (hash, word) in old_hashes.into_iter().zip(old_words) {
            if word != EMPTY {
                self.insert_inner(hash, word);
            }
        }
    }

    /// Drop all entries, keeping capacity - block-local tables are reset
    /// this way on block recycle
    pub fn clear(&mut self) {
        self.words.fill(EMPTY);
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_empty() {
        let table = WordHash::with_estimate(16);
        assert_eq!(table.get(hash_value(b"chr1"), |_| true), None);
    }

    #[test]
    fn test_insert_then_get() {
        let mut table = WordHash::with_estimate(16);
        let h = hash_value(b"chr1");
        assert!(table.insert(h, 0));
        assert_eq!(table.get(h, |w| w == 0), Some(0));
        assert_eq!(table.get(hash_value(b"chr2"), |_| true), None);
    }

    #[test]
    fn test_growth_preserves_entries() {
        let mut table = WordHash::with_estimate(4);
        let values: Vec<String> = (0..2000).map(|i| format!("value{i}")).collect();
        for (i, v) in values.iter().enumerate() {
            assert!(table.insert(hash_value(v.as_bytes()), i as u32));
        }
        for (i, v) in values.iter().enumerate() {
            let got = table.get(hash_value(v.as_bytes()), |w| w == i as u32);
            assert_eq!(got, Some(i as u32), "lost {v}");
        }
    }

    #[test]
    fn test_eq_disambiguates_hash_collisions() {
        let mut table = WordHash::with_estimate(16);
        let h = hash_value(b"x");
        // force two words under one hash; eq picks the right one
        assert!(table.insert(h, 1));
        assert!(table.insert(h, 2));
        assert_eq!(table.get(h, |w| w == 2), Some(2));
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut table = WordHash::with_estimate(16);
        assert!(table.insert(hash_value(b"a"), 0));
        let cap = table.mask + 1;
        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.mask + 1, cap);
        assert_eq!(table.get(hash_value(b"a"), |_| true), None);
    }
}
