use std::{
    mem,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use crossbeam::queue::ArrayQueue;

use crate::source::Record;

/// Default minimum capacity of a pooled buffer (16 MiB).
pub const DEFAULT_BUFFER_CAPACITY: usize = 16 * 1024 * 1024;
/// Default number of idle buffers the pool keeps around.
pub const DEFAULT_MAX_IDLE: usize = 64;

/// Reusable byte buffers for batches.
///
/// Internally synchronized with a lock-free bounded queue, so any number of
/// workers can take and return buffers concurrently.
pub struct BufferPool {
    idle: ArrayQueue<Vec<u8>>,
    min_capacity: usize,
    allocated: AtomicUsize,
}

impl BufferPool {
    pub fn new(min_capacity: usize, max_idle: usize) -> Self {
        Self {
            idle: ArrayQueue::new(max_idle.max(1)),
            min_capacity,
            allocated: AtomicUsize::new(0),
        }
    }

    /// An empty buffer with at least `min_capacity` bytes of capacity.
    pub fn get(&self) -> Vec<u8> {
        match self.idle.pop() {
            Some(mut buf) => {
                buf.clear();
                buf
            }
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                Vec::with_capacity(self.min_capacity)
            }
        }
    }

    /// Hand a buffer back. Undersized buffers and overflow beyond the idle
    /// limit are dropped.
    pub fn put(&self, mut buf: Vec<u8>) {
        if buf.capacity() < self.min_capacity {
            return;
        }
        buf.clear();
        let _ = self.idle.push(buf);
    }

    pub fn min_capacity(&self) -> usize {
        self.min_capacity
    }

    /// Buffers currently waiting for reuse.
    pub fn idle(&self) -> usize {
        self.idle.len()
    }

    /// Buffers freshly allocated over the pool's lifetime.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY, DEFAULT_MAX_IDLE)
    }
}

/// Hands out batches with run-unique, increasing IDs.
///
/// Clones share the pool and the ID counter, so every worker and the reader can
/// hold one.
#[derive(Clone)]
pub struct BatchFactory {
    pool: Arc<BufferPool>,
    counter: Arc<AtomicU64>,
}

impl BatchFactory {
    pub fn new(pool: Arc<BufferPool>) -> Self {
        Self::with_counter(pool, Arc::new(AtomicU64::new(0)))
    }

    /// Share an existing counter, e.g. one owned by the benchmark.
    pub fn with_counter(pool: Arc<BufferPool>, counter: Arc<AtomicU64>) -> Self {
        Self { pool, counter }
    }

    pub fn new_batch(&self) -> Batch {
        let id = self.counter.fetch_add(1, Ordering::AcqRel) + 1;
        Batch {
            id,
            buf: self.pool.get(),
            rows: 0,
            metrics: 0,
            pool: Arc::clone(&self.pool),
        }
    }

    /// Number of IDs issued so far.
    pub fn issued(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }
}

/// Records accumulated for one write request.
///
/// Owns a pooled buffer; the buffer goes back to the pool when the batch is
/// dropped.
pub struct Batch {
    id: u64,
    buf: Vec<u8>,
    rows: u64,
    metrics: u64,
    pool: Arc<BufferPool>,
}

impl Batch {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn metrics(&self) -> u64 {
        self.metrics
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Serialized payload, one record per line.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    pub fn append(&mut self, record: &Record) {
        self.buf.extend_from_slice(record.data());
        self.buf.push(b'\n');
        self.rows += 1;
        self.metrics += record.metrics();
    }

    /// Drop the payload after a successful send. Counts are kept so the caller
    /// can still report them.
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        self.pool.put(mem::take(&mut self.buf));
    }
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("id", &self.id)
            .field("rows", &self.rows)
            .field("metrics", &self.metrics)
            .field("bytes", &self.buf.len())
            .finish()
    }
}

#[cfg(test)]
#[path = "batch_tests.rs"]
mod tests;
