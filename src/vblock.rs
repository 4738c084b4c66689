//! Blocks: bounded units of input text processed by one worker end to end.
//! A block owns its text, row directory, per-block context array and
//! serialized output; blocks come from a fixed-size pool and are recycled
//! with their buffer capacities intact.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::buffer::Buffer;
use crate::context::{CtxPool, LocalType, VCtx};
use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::random_access::RaAccum;
use crate::recon::PCtx;
use crate::types::DataType;

/// Default block size: 16 MiB of input text
pub const DEFAULT_BLOCK_SIZE: usize = 16 << 20;

pub struct VBlock {
    /// 1-based block index; 0 means unassigned
    pub vblock_i: u32,
    pub data_type: DataType,

    /// Input text (zip) - reconstructed text goes to `recon`
    pub txt: Buffer,
    /// Start offset of each row in `txt` (zip side)
    pub rows: Vec<u32>,
    /// Absolute row index of the first row in this block
    pub first_row: u64,
    pub longest_row: u32,

    // zip side
    pub vctxs: Vec<VCtx>,
    ctx_map: HashMap<u64, usize>,
    /// Serialized compressed sections, written by the I/O thread
    pub z_data: Buffer,
    pub ra: RaAccum,
    /// The block context feeding random-access chromosome entries
    pub ra_chrom_did: Option<usize>,
    /// Source file, for error messages from workers
    pub path: std::path::PathBuf,
    /// Per-component configuration from the text header
    pub dt_config: u64,
    /// Bytes removed by opt-in numeric rounding (adjusts the recorded
    /// uncompressed size)
    pub txt_savings: u64,

    // piz side
    pub pctxs: Vec<PCtx>,
    pub pctx_map: HashMap<u64, usize>,
    pub recon: Buffer,
    pub expected_txt_len: u64,
    pub num_rows: u32,
}

impl VBlock {
    fn new() -> Self {
        VBlock {
            vblock_i: 0,
            data_type: DataType::Vcf,
            txt: Buffer::new("txt_data"),
            rows: Vec::new(),
            first_row: 0,
            longest_row: 0,
            vctxs: Vec::new(),
            ctx_map: HashMap::new(),
            z_data: Buffer::new("z_data"),
            ra: RaAccum::default(),
            ra_chrom_did: None,
            path: std::path::PathBuf::new(),
            dt_config: 0,
            txt_savings: 0,
            pctxs: Vec::new(),
            pctx_map: HashMap::new(),
            recon: Buffer::new("recon_data"),
            expected_txt_len: 0,
            num_rows: 0,
        }
    }

    /// The block-local context for `fingerprint`, created on first use with
    /// the given local type and flags (later calls keep the original
    /// configuration).
    pub fn ctx_with(
        &mut self,
        pool: &CtxPool,
        fingerprint: Fingerprint,
        ltype: LocalType,
        flags: u8,
    ) -> Result<usize> {
        if let Some(&did) = self.ctx_map.get(&fingerprint.num()) {
            return Ok(did);
        }
        let zctx_i = pool.get_or_create(fingerprint)?;
        let estimate = pool.growth_estimate(zctx_i);
        let did = self.vctxs.len();
        self.vctxs
            .push(VCtx::new(fingerprint, zctx_i, estimate, ltype, flags));
        self.ctx_map.insert(fingerprint.num(), did);
        Ok(did)
    }

    /// Reset for reuse, keeping buffer capacities
    pub fn release(&mut self) {
        self.vblock_i = 0;
        self.txt.release();
        self.rows.clear();
        self.first_row = 0;
        self.longest_row = 0;
        self.vctxs.clear();
        self.ctx_map.clear();
        self.z_data.release();
        self.ra.clear();
        self.ra_chrom_did = None;
        self.path = std::path::PathBuf::new();
        self.dt_config = 0;
        self.txt_savings = 0;
        self.pctxs.clear();
        self.pctx_map.clear();
        self.recon.release();
        self.expected_txt_len = 0;
        self.num_rows = 0;
    }
}

/// Pool of reusable blocks, bounded by the dispatcher's in-flight limit
pub struct VBlockPool {
    free: Mutex<Vec<Box<VBlock>>>,
    cond: Condvar,
    created: AtomicUsize,
    capacity: usize,
}

impl VBlockPool {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        VBlockPool {
            free: Mutex::new(Vec::with_capacity(capacity)),
            cond: Condvar::new(),
            created: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Take a block from the pool, waiting for a recycled one once the
    /// pool has reached capacity
    pub fn get(&self, vblock_i: u32, data_type: DataType) -> Box<VBlock> {
        let mut free = self.free.lock();
        let mut vb = loop {
            if let Some(vb) = free.pop() {
                break vb;
            }
            if self.created.load(Ordering::Relaxed) < self.capacity {
                self.created.fetch_add(1, Ordering::Relaxed);
                break Box::new(VBlock::new());
            }
            self.cond.wait(&mut free);
        };
        drop(free);
        vb.vblock_i = vblock_i;
        vb.data_type = data_type;
        vb.txt.set_owner("txt_data", vblock_i);
        vb.z_data.set_owner("z_data", vblock_i);
        vb.recon.set_owner("recon_data", vblock_i);
        vb
    }

    pub fn release(&self, mut vb: Box<VBlock>) {
        vb.release();
        self.free.lock().push(vb);
        self.cond.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_recycles_blocks() {
        let pool = VBlockPool::new(2);
        let mut vb = pool.get(1, DataType::Vcf);
        vb.txt.extend_from_slice(b"some text");
        vb.rows.push(0);
        pool.release(vb);

        let vb = pool.get(2, DataType::Vcf);
        assert_eq!(vb.vblock_i, 2);
        assert!(vb.txt.is_empty());
        assert!(vb.rows.is_empty());
    }

    #[test]
    fn test_ctx_with_is_idempotent() {
        let pool = CtxPool::new();
        let mut vb = VBlock::new();
        let fp = Fingerprint::primary(b"CHROM");
        let a = vb.ctx_with(&pool, fp, LocalType::Text, 0).unwrap();
        let b = vb.ctx_with(&pool, fp, LocalType::Text, 0).unwrap();
        assert_eq!(a, b);
        assert_eq!(vb.vctxs.len(), 1);
    }
}
