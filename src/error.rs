use std::path::PathBuf;

/// Custom Result type for seqzip operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the seqzip library, encompassing all possible error
/// cases that can occur while compressing or decompressing an archive.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub enum Error {
    /// Errors related to file and section headers
    #[error("Error processing header: {0}")]
    HeaderError(#[from] HeaderError),

    /// Errors raised while segmenting input text into contexts
    #[error("Error segmenting input: {0}")]
    SegError(#[from] SegError),

    /// Errors raised while reconstructing text from contexts
    #[error("Error reconstructing output: {0}")]
    ReconError(#[from] ReconError),

    /// Errors related to per-field contexts and their dictionaries
    #[error("Error in field context: {0}")]
    ContextError(#[from] ContextError),

    /// Errors related to encryption and passwords
    #[error("Error with encryption: {0}")]
    CryptError(#[from] CryptError),

    /// Errors related to the random-access index and region filters
    #[error("Error processing index: {0}")]
    IndexError(#[from] IndexError),

    /// Standard I/O errors
    #[error("Error with IO: {0}")]
    IoError(#[from] std::io::Error),

    /// UTF-8 conversion errors
    #[error("Error with UTF8: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),

    /// Generic errors for other unexpected situations
    GenericError(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors specific to processing and validating archive headers and sections
#[derive(thiserror::Error, Debug)]
pub enum HeaderError {
    /// The magic number of a section does not match the expected value
    #[error("Invalid section magic number: {found:#010x} at offset {offset}")]
    InvalidSectionMagic { found: u32, offset: u64 },

    /// The magic number in the file header does not match the expected value
    #[error("Not a seqzip archive: invalid file magic")]
    InvalidFileMagic,

    /// The archive was written by a newer format version
    #[error(
        "Archive format version {found} is newer than the supported version {supported} - please upgrade seqzip"
    )]
    UnsupportedVersion { found: u8, supported: u8 },

    /// The section type tag is not recognized
    #[error("Unknown section type: {0}")]
    UnknownSectionType(u16),

    /// The codec tag in a section header is not recognized
    #[error("Unknown codec tag: {0}")]
    UnknownCodec(u8),

    /// The local-type tag in a context section header is not recognized
    #[error("Unknown local-type tag: {0}")]
    UnknownLocalType(u8),

    /// The data-type tag in the file header is not recognized
    #[error("Unknown data type tag: {0}")]
    UnknownDataType(u8),

    /// A section was expected but the file ended
    #[error("Unexpected end of archive while reading {expected} at offset {offset}")]
    UnexpectedEof { expected: &'static str, offset: u64 },

    /// The footer offset recorded in the last 8 bytes is out of range
    #[error("Corrupt archive: footer offset {0} is out of range")]
    BadFooterOffset(u64),

    /// Expected one section type, found another
    #[error("Expected {expected} section, found {found}")]
    SectionTypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// Headers of concatenated components are incompatible
    #[error("Cannot concatenate {}: {reason}", .path.display())]
    IncompatibleComponent { path: PathBuf, reason: String },
}

/// Errors raised while segmenting input lines into field contexts
#[derive(thiserror::Error, Debug)]
pub enum SegError {
    /// A line could not be parsed into the fields of its data type
    #[error(
        "{}: invalid {data_type} data in block {vblock_i}, line {line_i}: expecting {expected}, found {found:?}",
        .path.display()
    )]
    MalformedLine {
        path: PathBuf,
        data_type: &'static str,
        vblock_i: u32,
        line_i: u64,
        expected: &'static str,
        found: String,
    },

    /// A single record is larger than the configured block size
    #[error(
        "{}: record at line {line_i} exceeds the block size of {block_size} bytes - rerun with a larger block size",
        .path.display()
    )]
    RecordExceedsBlockSize {
        path: PathBuf,
        line_i: u64,
        block_size: usize,
    },

    /// Input text did not end on a record boundary of the data type
    #[error("{}: truncated {data_type} record at end of input", .path.display())]
    TruncatedRecord {
        path: PathBuf,
        data_type: &'static str,
    },

    /// A required text header is missing
    #[error(
        "{}: missing {data_type} header - expecting first line to start with {first_char:?}",
        .path.display()
    )]
    MissingTxtHeader {
        path: PathBuf,
        data_type: &'static str,
        first_char: char,
    },

    /// The data type of an input file could not be recognized
    #[error("{}: unrecognized input type (expecting vcf, sam, fastq, fasta, gff3 or 23andMe)", .0.display())]
    UnknownInputType(PathBuf),
}

/// Errors raised while reconstructing the original text at decode time
#[derive(thiserror::Error, Debug)]
pub enum ReconError {
    /// A b250 stream ended while more references were expected
    #[error("Block {vblock_i}: unexpected end of word references in context {ctx}")]
    B250Overrun { vblock_i: u32, ctx: String },

    /// A b250 reference does not resolve to a dictionary word
    #[error("Block {vblock_i}: word index {word_i} out of range in context {ctx} ({num_words} words)")]
    BadWordIndex {
        vblock_i: u32,
        ctx: String,
        word_i: u32,
        num_words: usize,
    },

    /// A local stream ended while more data was expected
    #[error("Block {vblock_i}: unexpected end of local data in context {ctx}")]
    LocalOverrun { vblock_i: u32, ctx: String },

    /// A context holds neither word references nor local data
    #[error("Block {vblock_i}: context {ctx} has no data")]
    EmptyContext { vblock_i: u32, ctx: String },

    /// A snip carries an unknown control code
    #[error("Block {vblock_i}: invalid control snip {code} in context {ctx}")]
    BadControlSnip {
        vblock_i: u32,
        ctx: String,
        code: u8,
    },

    /// A special-handler index is not registered for this data type
    #[error(
        "Block {vblock_i}: special handler {special} is not known to this version - please upgrade seqzip"
    )]
    UnknownSpecial { vblock_i: u32, special: u8 },

    /// Reconstructed size does not match the size recorded in the block header
    #[error("Block {vblock_i}: reconstructed {got} bytes, expecting {expected}")]
    SizeMismatch {
        vblock_i: u32,
        expected: u64,
        got: u64,
    },

    /// The digest of the reconstructed data does not match the archive
    #[error("Digest mismatch: archive records {expected}, reconstructed data digests to {got}")]
    DigestMismatch { expected: String, got: String },
}

/// Errors related to per-field contexts
#[derive(thiserror::Error, Debug)]
pub enum ContextError {
    /// More than 2^31 distinct values in one context
    #[error("Context {0}: dictionary exceeds 2^31 words")]
    TooManyWords(String),

    /// Dictionary byte buffer exceeded 2^32 bytes
    #[error("Context {0}: dictionary exceeds 2^32 bytes")]
    DictOverflow(String),

    /// Too many distinct contexts in one archive
    #[error("Too many field contexts: the maximum is {0}")]
    TooManyContexts(usize),
}

/// Errors related to encryption
#[derive(thiserror::Error, Debug)]
pub enum CryptError {
    /// The archive is encrypted but no password was supplied
    #[error("Archive is encrypted: a password is required")]
    PasswordRequired,

    /// The supplied password failed the first-section self test
    #[error("Wrong password for encrypted archive")]
    WrongPassword,

    /// A password was supplied but the archive is not encrypted
    #[error("Archive is not encrypted, but a password was supplied")]
    NotEncrypted,

    /// Payload authentication failed mid-archive (corruption)
    #[error("Section decryption failed in block {0} - archive is corrupt")]
    CorruptSection(u32),
}

/// Errors related to the random-access index and region filters
#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    /// A region string could not be parsed
    #[error("Invalid region {0:?}: expecting chrom, chrom:pos or chrom:start-end")]
    BadRegion(String),

    /// A region references a chromosome absent from the archive
    #[error("Chromosome {0:?} does not appear in this archive")]
    UnknownChrom(String),

    /// The archive carries no random-access index
    #[error("Archive has no random-access index (not a position-indexed data type)")]
    NoIndex,
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn test_error_from_header_error() {
        let error: Error = HeaderError::InvalidFileMagic.into();
        assert!(matches!(error, Error::HeaderError(_)));
    }

    #[test]
    fn test_error_from_context_error() {
        let error: Error = ContextError::TooManyWords("CHROM".into()).into();
        assert!(matches!(error, Error::ContextError(_)));
    }

    #[test]
    fn test_unsupported_version_message() {
        let error = HeaderError::UnsupportedVersion {
            found: 99,
            supported: 1,
        };
        let error_str = format!("{}", error);
        assert!(error_str.contains("99"));
        assert!(error_str.contains("upgrade"));
    }

    #[test]
    fn test_digest_mismatch_shows_both() {
        let error = ReconError::DigestMismatch {
            expected: "aa".into(),
            got: "bb".into(),
        };
        let error_str = format!("{}", error);
        assert!(error_str.contains("aa"));
        assert!(error_str.contains("bb"));
    }

    #[test]
    fn test_malformed_line_context() {
        let error = SegError::MalformedLine {
            path: "a.vcf".into(),
            data_type: "vcf",
            vblock_i: 3,
            line_i: 17,
            expected: "a numeric POS field",
            found: "xyz".into(),
        };
        let error_str = format!("{}", error);
        assert!(error_str.contains("a.vcf"));
        assert!(error_str.contains("block 3"));
        assert!(error_str.contains("line 17"));
        assert!(error_str.contains("xyz"));
    }
}
