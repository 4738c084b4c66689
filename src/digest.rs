//! Running SHA-256 digests over original (zip) or reconstructed (unzip)
//! bytes. Two digests run side by side: one for the current component and
//! one for the whole archive, so concatenated archives record both. Only
//! the I/O thread feeds these, in byte order.

use sha2::{Digest as _, Sha256};

pub const DIGEST_LEN: usize = 32;

pub type DigestBytes = [u8; DIGEST_LEN];

pub struct RunningDigest {
    single: Sha256,
    concat: Sha256,
}

impl Default for RunningDigest {
    fn default() -> Self {
        RunningDigest {
            single: Sha256::new(),
            concat: Sha256::new(),
        }
    }
}

impl RunningDigest {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.single.update(bytes);
        self.concat.update(bytes);
    }

    /// Finish the per-component digest and reset it for the next component
    pub fn finish_component(&mut self) -> DigestBytes {
        let digest = std::mem::take(&mut self.single).finalize();
        digest.into()
    }

    /// Finish the whole-archive digest
    pub fn finish_concat(self) -> DigestBytes {
        self.concat.finalize().into()
    }
}

#[must_use]
pub fn hex(digest: &DigestBytes) -> String {
    let mut out = String::with_capacity(DIGEST_LEN * 2);
    for b in digest {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_updates_equal_one_update() {
        let mut a = RunningDigest::new();
        a.update(b"hello ");
        a.update(b"world");
        let mut b = RunningDigest::new();
        b.update(b"hello world");
        assert_eq!(a.finish_component(), b.finish_component());
    }

    #[test]
    fn test_component_reset() {
        let mut d = RunningDigest::new();
        d.update(b"one");
        let first = d.finish_component();
        d.update(b"one");
        let second = d.finish_component();
        assert_eq!(first, second);
    }

    #[test]
    fn test_concat_spans_components() {
        let mut d = RunningDigest::new();
        d.update(b"one");
        d.finish_component();
        d.update(b"two");
        d.finish_component();
        let concat = d.finish_concat();

        let mut whole = RunningDigest::new();
        whole.update(b"onetwo");
        whole.finish_component();
        assert_eq!(concat, whole.finish_concat());
    }

    #[test]
    fn test_hex() {
        let digest = [0xab; DIGEST_LEN];
        assert_eq!(&hex(&digest)[..4], "abab");
    }
}
