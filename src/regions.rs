//! User-supplied genomic region filters: parsing of `chrom`,
//! `chrom:pos` and `chrom:start-end` strings, resolution of chromosome
//! names against the chromosome dictionary, and site/range inclusion
//! tests used both for block selection and per-row filtering.

use std::collections::HashMap;

use crate::error::{IndexError, Result};

/// A parsed region before chromosome-name resolution
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegionSpec {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
}

impl RegionSpec {
    /// Parse one region string
    pub fn parse(text: &str) -> Result<Self> {
        let bad = || IndexError::BadRegion(text.to_string());
        let (chrom, range) = match text.split_once(':') {
            None => (text, None),
            Some((chrom, range)) => (chrom, Some(range)),
        };
        if chrom.is_empty() {
            return Err(bad().into());
        }
        let (start, end) = match range {
            None => (0, u64::MAX),
            Some(range) => match range.split_once('-') {
                None => {
                    let pos: u64 = range.parse().map_err(|_| bad())?;
                    (pos, pos)
                }
                Some((s, e)) => {
                    let start: u64 = if s.is_empty() { 0 } else { s.parse().map_err(|_| bad())? };
                    let end: u64 = if e.is_empty() {
                        u64::MAX
                    } else {
                        e.parse().map_err(|_| bad())?
                    };
                    if start > end {
                        return Err(bad().into());
                    }
                    (start, end)
                }
            },
        };
        Ok(RegionSpec {
            chrom: chrom.to_string(),
            start,
            end,
        })
    }
}

/// Region specs resolved against the chromosome dictionary. Specs naming a
/// chromosome absent from the archive match nothing (an empty result is
/// not an error).
#[derive(Default)]
pub struct RegionFilter {
    by_chrom: HashMap<u32, Vec<(u64, u64)>>,
}

impl RegionFilter {
    pub fn new(
        specs: &[RegionSpec],
        mut chrom_word: impl FnMut(&str) -> Option<u32>,
    ) -> Self {
        let mut by_chrom: HashMap<u32, Vec<(u64, u64)>> = HashMap::new();
        for spec in specs {
            if let Some(word) = chrom_word(&spec.chrom) {
                by_chrom.entry(word).or_default().push((spec.start, spec.end));
            }
        }
        RegionFilter { by_chrom }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_chrom.is_empty()
    }

    /// Is a single site included?
    #[must_use]
    pub fn is_site_included(&self, chrom_word: u32, pos: u64) -> bool {
        self.range_overlaps(chrom_word, pos, pos)
    }

    /// Does [min, max] on this chromosome overlap any region?
    #[must_use]
    pub fn range_overlaps(&self, chrom_word: u32, min: u64, max: u64) -> bool {
        self.by_chrom
            .get(&chrom_word)
            .is_some_and(|ranges| ranges.iter().any(|&(s, e)| min <= e && max >= s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chrom_only() {
        let spec = RegionSpec::parse("chr1").unwrap();
        assert_eq!(spec.chrom, "chr1");
        assert_eq!(spec.start, 0);
        assert_eq!(spec.end, u64::MAX);
    }

    #[test]
    fn test_parse_single_position() {
        let spec = RegionSpec::parse("chr1:100").unwrap();
        assert_eq!((spec.start, spec.end), (100, 100));
    }

    #[test]
    fn test_parse_range() {
        let spec = RegionSpec::parse("chrX:100-200").unwrap();
        assert_eq!(spec.chrom, "chrX");
        assert_eq!((spec.start, spec.end), (100, 200));
    }

    #[test]
    fn test_parse_open_ended() {
        assert_eq!(RegionSpec::parse("1:-500").unwrap().end, 500);
        assert_eq!(RegionSpec::parse("1:500-").unwrap().start, 500);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(RegionSpec::parse("").is_err());
        assert!(RegionSpec::parse("chr1:abc").is_err());
        assert!(RegionSpec::parse("chr1:200-100").is_err());
    }

    #[test]
    fn test_filter_site_inclusion() {
        let specs = vec![RegionSpec::parse("chr1:100-200").unwrap()];
        let filter = RegionFilter::new(&specs, |name| (name == "chr1").then_some(0));
        assert!(filter.is_site_included(0, 100));
        assert!(filter.is_site_included(0, 200));
        assert!(!filter.is_site_included(0, 99));
        assert!(!filter.is_site_included(1, 150));
    }

    #[test]
    fn test_filter_range_overlap() {
        let specs = vec![RegionSpec::parse("chr1:195-205").unwrap()];
        let filter = RegionFilter::new(&specs, |_| Some(0));
        // a record at 150 whose END reaches 200 overlaps
        assert!(filter.range_overlaps(0, 150, 200));
        assert!(!filter.range_overlaps(0, 150, 190));
    }

    #[test]
    fn test_unknown_chrom_matches_nothing() {
        let specs = vec![RegionSpec::parse("chr9").unwrap()];
        let filter = RegionFilter::new(&specs, |_| None);
        assert!(!filter.is_site_included(0, 1));
    }
}
