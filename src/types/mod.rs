//! Supported data types and their capability tables. Dispatch is a table
//! lookup: each data type supplies its segmenter, reconstructor, special
//! snip handlers, record-boundary scan and concatenation rules.

use std::path::Path;

use crate::error::{HeaderError, Result, SegError};
use crate::recon::{Recon, SpecialFn};
use crate::seg::Seg;

pub mod fasta;
pub mod fastq;
pub mod gff3;
pub mod me23;
pub mod sam;
pub mod vcf;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum DataType {
    Vcf = 0,
    Sam = 1,
    Fastq = 2,
    Fasta = 3,
    Gff3 = 4,
    Me23 = 5,
}

impl DataType {
    #[must_use]
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(DataType::Vcf),
            1 => Ok(DataType::Sam),
            2 => Ok(DataType::Fastq),
            3 => Ok(DataType::Fasta),
            4 => Ok(DataType::Gff3),
            5 => Ok(DataType::Me23),
            _ => Err(HeaderError::UnknownDataType(tag).into()),
        }
    }

    #[must_use]
    pub fn def(self) -> &'static DataTypeDef {
        DATA_TYPES[self as usize]
    }

    /// Recognize an input file by its extension
    pub fn detect(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        for def in &DATA_TYPES {
            if def.extensions.contains(&ext.as_str()) {
                return Ok(def.data_type);
            }
        }
        Err(SegError::UnknownInputType(path.to_path_buf()).into())
    }
}

pub struct DataTypeDef {
    pub data_type: DataType,
    pub name: &'static str,
    pub extensions: &'static [&'static str],

    /// Byte starting every text-header line, if the type has a header
    pub header_line_prefix: Option<u8>,
    pub header_required: bool,
    /// Opaque per-component configuration derived from the text header
    /// (VCF: declared sample count), passed to the segmenter
    pub header_config: fn(header: &[u8]) -> u64,
    /// Are two components' headers compatible for concatenation?
    pub concat_check: fn(first: &[u8], next: &[u8]) -> std::result::Result<(), String>,

    pub seg_init: fn(&mut Seg<'_>) -> Result<()>,
    /// Segment one record starting at the head of `text`; returns the
    /// bytes consumed. A record is one line for tabular types and several
    /// physical lines for read records.
    pub seg_row: fn(&mut Seg<'_>, text: &[u8]) -> Result<usize>,
    pub seg_finish: Option<fn(&mut Seg<'_>) -> Result<()>>,

    pub recon_init: fn(&mut Recon<'_>) -> Result<()>,
    pub recon_row: fn(&mut Recon<'_>) -> Result<()>,
    pub specials: &'static [SpecialFn],

    /// Offset just past the last complete record, for block carry-over
    pub last_record_end: fn(txt: &[u8]) -> Option<usize>,
    /// Logical records in a block's text (known before segmentation)
    pub count_rows: fn(txt: &[u8]) -> u64,

    /// Does this type feed the random-access index?
    pub has_random_access: bool,
    /// The context whose dictionary resolves region chromosome names
    pub chrom_fp: Option<fn() -> crate::fingerprint::Fingerprint>,
}

/// Rows of a line-oriented block: newlines plus an unterminated tail
pub(crate) fn count_lines(txt: &[u8]) -> u64 {
    let lines = memchr::memchr_iter(b'\n', txt).count() as u64;
    lines + (txt.last().is_some_and(|&b| b != b'\n')) as u64
}

/// Rows of a four-line-record block
pub(crate) fn count_quads(txt: &[u8]) -> u64 {
    count_lines(txt).div_ceil(4)
}

pub(crate) fn no_header_config(_header: &[u8]) -> u64 {
    0
}

pub(crate) fn no_concat_check(_first: &[u8], _next: &[u8]) -> std::result::Result<(), String> {
    Ok(())
}

pub(crate) fn no_recon_init(_r: &mut Recon<'_>) -> Result<()> {
    Ok(())
}

static DATA_TYPES: [&DataTypeDef; 6] = [
    &vcf::DEF,
    &sam::DEF,
    &fastq::DEF,
    &fasta::DEF,
    &gff3::DEF,
    &me23::DEF,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_by_extension() {
        assert_eq!(DataType::detect(Path::new("a.vcf")).unwrap(), DataType::Vcf);
        assert_eq!(DataType::detect(Path::new("a.FQ")).unwrap(), DataType::Fastq);
        assert_eq!(
            DataType::detect(Path::new("ref.fasta")).unwrap(),
            DataType::Fasta
        );
        assert_eq!(
            DataType::detect(Path::new("genome.txt")).unwrap(),
            DataType::Me23
        );
        assert!(DataType::detect(Path::new("a.bin")).is_err());
    }

    #[test]
    fn test_tag_roundtrip() {
        for dt in [
            DataType::Vcf,
            DataType::Sam,
            DataType::Fastq,
            DataType::Fasta,
            DataType::Gff3,
            DataType::Me23,
        ] {
            assert_eq!(DataType::from_tag(dt.tag()).unwrap(), dt);
            assert_eq!(dt.def().data_type, dt);
        }
    }
}
