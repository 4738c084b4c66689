//! The worker pool behind both pipelines: blocks are handed to workers in
//! issue order, each worker computes one block to completion, and the
//! I/O thread collects results strictly in issue order regardless of
//! completion order. No worker writes to the archive; all output bytes
//! flow through the caller. A fatal error anywhere raises the abort flag,
//! surfaces the first error, and the pool drains on finish.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::vblock::VBlock;

pub type WorkFn = Arc<dyn Fn(&mut VBlock) -> Result<()> + Send + Sync>;

enum Done {
    Ok(Box<VBlock>),
    Err(Error),
}

pub struct Dispatcher {
    work_tx: Option<Sender<(u32, Box<VBlock>)>>,
    done_rx: Receiver<(u32, Done)>,
    handles: Vec<JoinHandle<()>>,
    abort: Arc<AtomicBool>,

    pending: BTreeMap<u32, Box<VBlock>>,
    next_seq_in: u32,
    next_seq_out: u32,
    outstanding: usize,
    max_outstanding: usize,
    aborted: bool,
}

impl Dispatcher {
    /// Spawn `num_threads` workers (0 means all cores). The pool accepts
    /// up to `num_threads + 2` blocks in flight; beyond that the caller
    /// must drain results first - that bound is the pipeline's
    /// backpressure.
    pub fn new(num_threads: usize, work: WorkFn) -> Self {
        let num_threads = if num_threads == 0 {
            num_cpus::get()
        } else {
            num_threads.min(num_cpus::get()).max(1)
        };
        let (work_tx, work_rx) = channel::<(u32, Box<VBlock>)>();
        let (done_tx, done_rx) = channel();
        let work_rx = Arc::new(Mutex::new(work_rx));
        let abort = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::with_capacity(num_threads);
        for _ in 0..num_threads {
            let work_rx = work_rx.clone();
            let done_tx: Sender<(u32, Done)> = done_tx.clone();
            let work = work.clone();
            let abort = abort.clone();
            handles.push(std::thread::spawn(move || loop {
                let msg = { work_rx.lock().recv() };
                let Ok((seq, mut vb)) = msg else {
                    break;
                };
                if abort.load(Ordering::Acquire) {
                    let _ = done_tx.send((seq, Done::Ok(vb)));
                    continue;
                }
                let done = match work(&mut vb) {
                    Ok(()) => Done::Ok(vb),
                    Err(e) => {
                        abort.store(true, Ordering::Release);
                        Done::Err(e)
                    }
                };
                let _ = done_tx.send((seq, done));
            }));
        }

        Dispatcher {
            work_tx: Some(work_tx),
            done_rx,
            handles,
            abort,
            pending: BTreeMap::new(),
            next_seq_in: 0,
            next_seq_out: 0,
            outstanding: 0,
            max_outstanding: num_threads + 2,
            aborted: false,
        }
    }

    #[must_use]
    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        self.abort.clone()
    }

    /// Room for another in-flight block?
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.outstanding < self.max_outstanding
    }

    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Maximum blocks in flight; the block pool is sized to this
    #[must_use]
    pub fn max_outstanding(&self) -> usize {
        self.max_outstanding
    }

    /// Hand a block to the pool
    pub fn dispatch(&mut self, vb: Box<VBlock>) -> Result<()> {
        if self.aborted {
            return Err(std::io::Error::other("pipeline aborted").into());
        }
        debug_assert!(self.has_capacity());
        let seq = self.next_seq_in;
        self.next_seq_in += 1;
        self.outstanding += 1;
        self.work_tx
            .as_ref()
            .expect("dispatcher already finished")
            .send((seq, vb))
            .map_err(|_| std::io::Error::other("worker pool is gone"))?;
        Ok(())
    }

    /// The next completed block in dispatch order. With `blocking` false,
    /// returns Ok(None) when it is not ready yet; with `blocking` true,
    /// waits for it (Ok(None) only when nothing is in flight).
    pub fn next_done(&mut self, blocking: bool) -> Result<Option<Box<VBlock>>> {
        loop {
            if let Some(vb) = self.pending.remove(&self.next_seq_out) {
                self.next_seq_out += 1;
                self.outstanding -= 1;
                return Ok(Some(vb));
            }
            if self.outstanding == 0 {
                return Ok(None);
            }
            let recv = if blocking {
                self.done_rx
                    .recv()
                    .map_err(|_| std::io::Error::other("worker pool is gone"))?
            } else {
                match self.done_rx.try_recv() {
                    Ok(msg) => msg,
                    Err(_) => return Ok(None),
                }
            };
            match recv {
                (seq, Done::Ok(vb)) => {
                    self.pending.insert(seq, vb);
                }
                (_, Done::Err(e)) => {
                    self.aborted = true;
                    self.abort.store(true, Ordering::Release);
                    return Err(e);
                }
            }
        }
    }

    /// Drop the work channel and join the pool. Returns the first error a
    /// worker raised after the abort, if any surfaced during the drain.
    pub fn finish(mut self) -> Result<()> {
        self.work_tx = None;
        let mut first_error = None;
        while let Ok((_, done)) = self.done_rx.recv() {
            if let (Done::Err(e), None) = (done, first_error.as_ref()) {
                first_error = Some(e);
            }
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;
    use crate::vblock::VBlockPool;

    fn spin_up(work: WorkFn) -> (Dispatcher, VBlockPool) {
        let dispatcher = Dispatcher::new(4, work);
        let pool = VBlockPool::new(dispatcher.max_outstanding());
        (dispatcher, pool)
    }

    #[test]
    fn test_results_come_back_in_dispatch_order() {
        let work: WorkFn = Arc::new(|vb| {
            // later blocks finish first
            std::thread::sleep(std::time::Duration::from_millis(
                (20 - vb.vblock_i.min(20)) as u64,
            ));
            vb.z_data.extend_from_slice(&vb.vblock_i.to_le_bytes());
            Ok(())
        });
        let (mut dispatcher, pool) = spin_up(work);

        let mut collected = Vec::new();
        for i in 1..=12u32 {
            while !dispatcher.has_capacity() {
                let vb = dispatcher.next_done(true).unwrap().unwrap();
                collected.push(vb.vblock_i);
                pool.release(vb);
            }
            dispatcher.dispatch(pool.get(i, DataType::Vcf)).unwrap();
        }
        while let Some(vb) = dispatcher.next_done(true).unwrap() {
            collected.push(vb.vblock_i);
            pool.release(vb);
        }
        dispatcher.finish().unwrap();
        assert_eq!(collected, (1..=12).collect::<Vec<_>>());
    }

    #[test]
    fn test_worker_error_surfaces_and_aborts() {
        let work: WorkFn = Arc::new(|vb| {
            if vb.vblock_i == 3 {
                Err(std::io::Error::other("boom").into())
            } else {
                Ok(())
            }
        });
        let (mut dispatcher, pool) = spin_up(work);
        for i in 1..=5u32 {
            dispatcher.dispatch(pool.get(i, DataType::Vcf)).unwrap();
        }
        let mut saw_error = false;
        loop {
            match dispatcher.next_done(true) {
                Ok(Some(vb)) => pool.release(vb),
                Ok(None) => break,
                Err(e) => {
                    assert!(format!("{e}").contains("boom"));
                    saw_error = true;
                    break;
                }
            }
        }
        assert!(saw_error);
        assert!(dispatcher.abort_flag().load(Ordering::Acquire));
        let _ = dispatcher.finish();
    }
}
