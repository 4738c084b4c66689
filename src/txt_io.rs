//! Input-side text I/O: reading the per-component text header and
//! variable-sized text blocks, carrying the partial trailing record of
//! each block over to the next one, and feeding the running digest in
//! file order (carried-over bytes are digested when first read, exactly
//! once).

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::buffer::Buffer;
use crate::digest::RunningDigest;
use crate::error::{Result, SegError};
use crate::types::DataTypeDef;

const READ_BUFFER_SIZE: usize = 512 << 10;

pub struct TxtReader {
    file: fs::File,
    pub path: PathBuf,
    unconsumed: Vec<u8>,
    eof: bool,
    /// Rows issued so far, so block-size errors can point at a line
    pub rows_issued: u64,
}

impl TxtReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = fs::File::open(path)?;
        Ok(TxtReader {
            file,
            path: path.to_path_buf(),
            unconsumed: Vec::new(),
            eof: false,
            rows_issued: 0,
        })
    }

    /// One read syscall appending to `dst`; digests exactly what was read
    fn read_some(&mut self, dst: &mut Vec<u8>, digest: &mut RunningDigest) -> Result<usize> {
        let start = dst.len();
        dst.resize(start + READ_BUFFER_SIZE, 0);
        let n = self.file.read(&mut dst[start..])?;
        dst.truncate(start + n);
        if n == 0 {
            self.eof = true;
        } else {
            digest.update(&dst[start..]);
        }
        Ok(n)
    }

    /// Read the component's text header: the run of leading lines starting
    /// with the data type's header prefix. Bytes beyond the header stay
    /// buffered for the first block.
    pub fn read_header(
        &mut self,
        def: &'static DataTypeDef,
        digest: &mut RunningDigest,
    ) -> Result<Vec<u8>> {
        let Some(prefix) = def.header_line_prefix else {
            return Ok(Vec::new());
        };
        let mut header_end = 0usize;
        loop {
            // find complete lines beyond header_end and test each
            let mut line_start = header_end;
            let mut done = false;
            while let Some(nl) = memchr::memchr(b'\n', &self.unconsumed[line_start..]) {
                let line = &self.unconsumed[line_start..line_start + nl + 1];
                if line.first() == Some(&prefix) {
                    line_start += nl + 1;
                    header_end = line_start;
                } else {
                    done = true;
                    break;
                }
            }
            if done {
                break;
            }
            // an incomplete trailing line may still turn out to be header
            let partial_nonempty = self.unconsumed.len() > header_end;
            let partial_is_header = self.unconsumed.get(header_end) == Some(&prefix);
            if partial_nonempty && !partial_is_header {
                break;
            }
            if self.read_some_unconsumed(digest)? == 0 {
                // EOF: a final header line without a newline stays header
                if partial_nonempty && partial_is_header {
                    header_end = self.unconsumed.len();
                }
                break;
            }
        }
        if header_end == 0 && def.header_required {
            return Err(SegError::MissingTxtHeader {
                path: self.path.clone(),
                data_type: def.name,
                first_char: prefix as char,
            }
            .into());
        }
        let rest = self.unconsumed.split_off(header_end);
        let header = std::mem::replace(&mut self.unconsumed, rest);
        Ok(header)
    }

    fn read_some_unconsumed(&mut self, digest: &mut RunningDigest) -> Result<usize> {
        let mut buf = std::mem::take(&mut self.unconsumed);
        let n = self.read_some(&mut buf, digest)?;
        self.unconsumed = buf;
        Ok(n)
    }

    /// Fill one block: carried-over bytes first, then reads until the
    /// target size, then the partial trailing record is moved to the
    /// carry buffer. Returns false when the input is exhausted.
    pub fn read_block(
        &mut self,
        txt: &mut Buffer,
        block_size: usize,
        def: &'static DataTypeDef,
        digest: &mut RunningDigest,
    ) -> Result<bool> {
        debug_assert!(txt.is_empty());
        let dst = txt.as_mut_vec();
        std::mem::swap(dst, &mut self.unconsumed);
        self.unconsumed.clear();

        while dst.len() < block_size && !self.eof {
            self.read_some(dst, digest)?;
        }
        if dst.is_empty() {
            return Ok(false);
        }

        if dst.len() > block_size || !self.eof {
            // a record spanning into the next block is carried over; a
            // record larger than a whole block cannot be recovered by the
            // backward scan and is fatal
            let end = (def.last_record_end)(dst).ok_or_else(|| SegError::RecordExceedsBlockSize {
                path: self.path.clone(),
                line_i: self.rows_issued,
                block_size,
            })?;
            self.unconsumed.extend_from_slice(&dst[end..]);
            dst.truncate(end);
            if dst.is_empty() {
                return Err(SegError::RecordExceedsBlockSize {
                    path: self.path.clone(),
                    line_i: self.rows_issued,
                    block_size,
                }
                .into());
            }
        }
        Ok(true)
    }
}

/// Block boundary for line-oriented data types: after the last newline
#[must_use]
pub fn last_line_end(txt: &[u8]) -> Option<usize> {
    memchr::memrchr(b'\n', txt).map(|i| i + 1)
}

/// Block boundary for four-line records: after the last complete group of
/// four lines (blocks always start on a record boundary, so counting from
/// the block start stays in phase)
#[must_use]
pub fn last_quad_line_end(txt: &[u8]) -> Option<usize> {
    let mut count = 0usize;
    let mut last_quad = None;
    for nl in memchr::memchr_iter(b'\n', txt) {
        count += 1;
        if count % 4 == 0 {
            last_quad = Some(nl + 1);
        }
    }
    last_quad
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_line_end() {
        assert_eq!(last_line_end(b"a\nb\nc"), Some(4));
        assert_eq!(last_line_end(b"abc"), None);
    }

    #[test]
    fn test_last_quad_line_end() {
        let txt = b"@r\nAC\n+\nII\n@s\nGG\n";
        assert_eq!(last_quad_line_end(txt), Some(11));
        assert_eq!(last_quad_line_end(b"@r\nAC\n+\n"), None);
    }
}
