//! Uniform byte-stream compression interface over the codecs an archive may
//! use. Every section header records the codec that produced it, so each
//! section decompresses independently.
//!
//! - `Stored`: passthrough, for payloads that do not compress
//! - `Deflate`: general-purpose, cheap on short payloads
//! - `Zstd`: the default block compressor
//! - `ZstdLong`: high level with long-distance matching, for large local
//!   streams (sequence data)
//!
//! The `_iter` forms consume the payload as a sequence of slices so callers
//! can feed per-line spans without first materializing one contiguous
//! buffer.

use std::io::{self, Write};

use flate2::write::{DeflateDecoder, DeflateEncoder};
use flate2::Compression;

use crate::error::{HeaderError, Result};

const ZSTD_LEVEL: i32 = 3;
const ZSTD_LONG_LEVEL: i32 = 19;
const ZSTD_LONG_WINDOW_LOG: u32 = 27;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Codec {
    Stored = 0,
    Deflate = 1,
    Zstd = 2,
    ZstdLong = 3,
}

impl Codec {
    #[must_use]
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Codec::Stored),
            1 => Ok(Codec::Deflate),
            2 => Ok(Codec::Zstd),
            3 => Ok(Codec::ZstdLong),
            _ => Err(HeaderError::UnknownCodec(tag).into()),
        }
    }
}

/// Compress `parts` into `dst` (cleared first). Returns the uncompressed
/// length consumed.
pub fn compress_iter<'a>(
    codec: Codec,
    parts: impl Iterator<Item = &'a [u8]>,
    dst: &mut Vec<u8>,
) -> Result<u64> {
    dst.clear();
    let mut total = 0u64;
    match codec {
        Codec::Stored => {
            for part in parts {
                total += part.len() as u64;
                dst.extend_from_slice(part);
            }
        }
        Codec::Deflate => {
            let mut enc = DeflateEncoder::new(&mut *dst, Compression::default());
            for part in parts {
                total += part.len() as u64;
                enc.write_all(part)?;
            }
            enc.finish()?;
        }
        Codec::Zstd | Codec::ZstdLong => {
            let mut enc = if codec == Codec::ZstdLong {
                let mut enc = zstd::stream::write::Encoder::new(&mut *dst, ZSTD_LONG_LEVEL)?;
                enc.long_distance_matching(true)?;
                enc.window_log(ZSTD_LONG_WINDOW_LOG)?;
                enc
            } else {
                zstd::stream::write::Encoder::new(&mut *dst, ZSTD_LEVEL)?
            };
            for part in parts {
                total += part.len() as u64;
                enc.write_all(part)?;
            }
            enc.finish()?;
        }
    }
    Ok(total)
}

/// Compress one contiguous payload into `dst` (cleared first)
pub fn compress(codec: Codec, src: &[u8], dst: &mut Vec<u8>) -> Result<()> {
    compress_iter(codec, std::iter::once(src), dst)?;
    Ok(())
}

/// Decompress `src` into `dst` (cleared first), verifying the recorded
/// uncompressed length.
pub fn decompress(codec: Codec, src: &[u8], uncomp_len: usize, dst: &mut Vec<u8>) -> Result<()> {
    dst.clear();
    dst.reserve(uncomp_len);
    match codec {
        Codec::Stored => dst.extend_from_slice(src),
        Codec::Deflate => {
            let mut dec = DeflateDecoder::new(&mut *dst);
            dec.write_all(src)?;
            dec.finish()?;
        }
        Codec::Zstd | Codec::ZstdLong => {
            zstd::stream::copy_decode(src, &mut *dst)?;
        }
    }
    if dst.len() != uncomp_len {
        return Err(io::Error::other(format!(
            "decompressed {} bytes, section header records {}",
            dst.len(),
            uncomp_len
        ))
        .into());
    }
    Ok(())
}

/// Pick the codec for a context payload: tiny payloads are stored, large
/// sequence-like payloads get the long-range mode, everything else zstd.
#[must_use]
pub fn pick(payload_len: usize, sequence_like: bool) -> Codec {
    if payload_len < 32 {
        Codec::Stored
    } else if sequence_like && payload_len > (1 << 16) {
        Codec::ZstdLong
    } else {
        Codec::Zstd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(codec: Codec, data: &[u8]) {
        let mut z = Vec::new();
        compress(codec, data, &mut z).unwrap();
        let mut out = Vec::new();
        decompress(codec, &z, data.len(), &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_roundtrip_all_codecs() {
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        for codec in [Codec::Stored, Codec::Deflate, Codec::Zstd, Codec::ZstdLong] {
            roundtrip(codec, &data);
            roundtrip(codec, b"");
            roundtrip(codec, b"x");
        }
    }

    #[test]
    fn test_iter_matches_contiguous() {
        let parts: Vec<&[u8]> = vec![b"ACGT", b"ACGTACGT", b"", b"TTTT"];
        let whole: Vec<u8> = parts.concat();
        for codec in [Codec::Deflate, Codec::Zstd] {
            let mut z_iter = Vec::new();
            let total = compress_iter(codec, parts.iter().copied(), &mut z_iter).unwrap();
            assert_eq!(total, whole.len() as u64);
            let mut out = Vec::new();
            decompress(codec, &z_iter, whole.len(), &mut out).unwrap();
            assert_eq!(out, whole);
        }
    }

    #[test]
    fn test_length_mismatch_detected() {
        let mut z = Vec::new();
        compress(Codec::Zstd, b"hello world hello world", &mut z).unwrap();
        let mut out = Vec::new();
        assert!(decompress(Codec::Zstd, &z, 5, &mut out).is_err());
    }

    #[test]
    fn test_codec_tags_roundtrip() {
        for codec in [Codec::Stored, Codec::Deflate, Codec::Zstd, Codec::ZstdLong] {
            assert_eq!(Codec::from_tag(codec.tag()).unwrap(), codec);
        }
        assert!(Codec::from_tag(9).is_err());
    }
}
