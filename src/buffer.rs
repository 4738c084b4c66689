//! Named growable byte buffers owned by a block. A block hands these out
//! during segmentation and reconstruction and recycles them all when it is
//! returned to the pool: lengths drop to zero, capacities stay, so steady
//! state allocates nothing per block.

/// Geometric growth factor applied on reallocation
const GROWTH_NUM: usize = 6;
const GROWTH_DEN: usize = 5;

/// Minimum absolute growth step in bytes
const MIN_GROWTH: usize = 4096;

/// A growable byte buffer carrying a diagnostic name and the index of the
/// block that owns it.
#[derive(Default)]
pub struct Buffer {
    data: Vec<u8>,
    name: &'static str,
    vblock_i: u32,
}

impl Buffer {
    pub fn new(name: &'static str) -> Self {
        Buffer {
            data: Vec::new(),
            name,
            vblock_i: 0,
        }
    }

    /// Tag this buffer with its owning block, for diagnostics
    pub fn set_owner(&mut self, name: &'static str, vblock_i: u32) {
        self.name = name;
        self.vblock_i = vblock_i;
    }

    /// Ensure room for `additional` more bytes, growing geometrically
    pub fn reserve(&mut self, additional: usize) {
        let needed = self.data.len() + additional;
        if needed > self.data.capacity() {
            let grown = (self.data.capacity() * GROWTH_NUM / GROWTH_DEN).max(needed);
            let target = grown.max(self.data.capacity() + MIN_GROWTH);
            self.data.reserve_exact(target - self.data.len());
        }
    }

    /// Length to zero, capacity preserved - O(1)
    pub fn release(&mut self) {
        self.data.clear();
        self.vblock_i = 0;
    }

    pub fn push(&mut self, byte: u8) {
        self.data.push(byte);
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }

    pub fn resize(&mut self, len: usize, fill: u8) {
        self.data.resize(len, fill);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_vec(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }
}

impl std::ops::Deref for Buffer {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl std::io::Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Buffer({} vb_i={} len={} cap={})",
            self.name,
            self.vblock_i,
            self.data.len(),
            self.data.capacity()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_keeps_capacity() {
        let mut buf = Buffer::new("txt_data");
        buf.extend_from_slice(&[1; 10_000]);
        let cap = buf.as_slice().len().max(buf.data.capacity());
        buf.release();
        assert!(buf.is_empty());
        assert!(buf.data.capacity() >= cap.min(10_000));
    }

    #[test]
    fn test_reserve_minimum_step() {
        let mut buf = Buffer::new("z_data");
        buf.reserve(1);
        assert!(buf.data.capacity() >= MIN_GROWTH);
    }

    #[test]
    fn test_owner_tag() {
        let mut buf = Buffer::new("local");
        buf.set_owner("local", 7);
        assert_eq!(format!("{buf:?}"), "Buffer(local vb_i=7 len=0 cap=0)");
    }
}
