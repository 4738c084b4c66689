//! # seqzip
//!
//! A field-aware compressor for genomic text formats: variant calls
//! (VCF), aligned reads (SAM), sequence reads (FASTQ), reference
//! sequences (FASTA), feature tables (GFF3) and personal-genotype
//! exports. Input lines are segmented into per-field contexts - a
//! dictionary, a word-reference stream and an auxiliary local stream per
//! field - which compress far better than the interleaved text. The
//! archive is a self-describing series of typed sections with an embedded
//! random-access index, so decoding can seek straight to the blocks
//! overlapping a genomic region, grep identifier lines, drop columns, and
//! verify the reconstruction against SHA-256 digests. Optional AES-GCM
//! encryption covers every section payload.
//!
//! Compression runs one I/O thread against a pool of workers; each block
//! of input text is segmented, merged into the archive-wide contexts and
//! compressed by one worker, and blocks land in the archive strictly in
//! order, so output is deterministic.
//!
//! # Example
//!
//! ```no_run
//! use std::path::{Path, PathBuf};
//! use seqzip::{zip, piz};
//!
//! fn main() -> seqzip::Result<()> {
//!     // compress two variant-call files into one archive
//!     let inputs = vec![PathBuf::from("a.vcf"), PathBuf::from("b.vcf")];
//!     zip::compress(&inputs, Path::new("ab.sqz"), &zip::ZipOptions::default())?;
//!
//!     // decode only a region of interest
//!     let mut out = Vec::new();
//!     let opts = piz::PizOptions {
//!         regions: vec!["chr1:100000-200000".into()],
//!         ..Default::default()
//!     };
//!     piz::decompress(Path::new("ab.sqz"), &mut out, &opts)?;
//!     Ok(())
//! }
//! ```

/// Archive output state and the on-disk header/footer structures
pub mod archive;

/// The word-reference byte encoding and its reserved codes
pub mod base250;

/// Named growable buffers recycled with their blocks
pub mod buffer;

/// Uniform interface over the per-section compressors
pub mod codec;

/// Per-field contexts: dictionaries, hashes, streams, merging
pub mod context;

/// Password-derived per-section encryption
pub mod crypt;

/// Running digests over original and reconstructed bytes
pub mod digest;

/// The worker pool with ordered output
mod dispatcher;

/// Error definitions
pub mod error;

/// Field fingerprints
pub mod fingerprint;

/// Open-addressing value-to-word hash tables
mod hash;

/// The decode pipeline
pub mod piz;

/// The random-access index
pub mod random_access;

/// The reconstruction engine
pub mod recon;

/// Genomic region filters
pub mod regions;

/// Section serialization
pub mod section;

/// Segmentation primitives
pub mod seg;

/// Control codes embedded in dictionary snips
mod snip;

/// Input text reading with record carry-over
mod txt_io;

/// Data types and their capability tables
pub mod types;

/// Blocks and the block pool
pub mod vblock;

/// The compress pipeline
pub mod zip;

pub use error::{Error, Result};
pub use piz::{ArchiveInfo, PizOptions, PizSummary};
pub use types::DataType;
pub use zip::{ZipOptions, ZipSummary};
