//! Reusable byte buffers, partitioned into "direct" and "heap" pools (C7).
//!
//! Rust has no `java.nio`-style off-heap "direct" buffer distinction — both
//! pools here are plain `Vec<u8>`-backed [`ByteBuf`]s. The split is kept
//! because callers (the block-aligned decorator borrowing scratch space for
//! a multi-block read, vs. a cache allocating an exact-size snapshot) have
//! different reuse patterns, and giving them separate caps avoids one
//! workload starving the other.
//!
//! The fast path (borrow/return when a same-or-larger buffer is already
//! pooled) never blocks: each pool is a [`crossbeam_queue::ArrayQueue`],
//! a bounded lock-free MPMC queue.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_queue::ArrayQueue;

use crate::buffer::ByteBuf;

/// Buffers are rounded up to the next multiple of this size class.
pub const SIZE_CLASS: usize = 8 * 1024;

/// A single direct or heap sub-pool: a bounded stack of spare buffers plus
/// counters for §4.7's statistics.
struct SubPool {
    buffers: ArrayQueue<ByteBuf>,
    created: AtomicUsize,
    reused: AtomicUsize,
    returned: AtomicUsize,
    discarded: AtomicUsize,
}

impl SubPool {
    fn new(capacity: usize) -> Self {
        Self {
            buffers: ArrayQueue::new(capacity.max(1)),
            created: AtomicUsize::new(0),
            reused: AtomicUsize::new(0),
            returned: AtomicUsize::new(0),
            discarded: AtomicUsize::new(0),
        }
    }

    fn borrow(&self, min_capacity: usize) -> ByteBuf {
        let rounded = round_up(min_capacity);

        // Pop everything looking for a buffer large enough; put back the
        // ones that don't fit. Bounded by queue length, no allocation on
        // the common (first-pop-fits) path.
        let mut spare = Vec::new();
        let mut found = None;
        while let Some(buf) = self.buffers.pop() {
            if found.is_none() && buf.capacity() >= rounded {
                found = Some(buf);
                break;
            }
            spare.push(buf);
        }
        for buf in spare {
            let _ = self.buffers.push(buf);
        }

        match found {
            Some(mut buf) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                buf.clear();
                buf.set_limit(min_capacity.min(buf.capacity()));
                buf
            }
            None => {
                self.created.fetch_add(1, Ordering::Relaxed);
                let mut buf = ByteBuf::with_capacity(rounded);
                buf.set_limit(min_capacity.min(buf.capacity()));
                buf
            }
        }
    }

    fn give_back(&self, mut buf: ByteBuf, min_buffer_size: usize) {
        if buf.capacity() < min_buffer_size {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }
        buf.clear();
        if self.buffers.push(buf).is_ok() {
            self.returned.fetch_add(1, Ordering::Relaxed);
        } else {
            self.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.created.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            returned: self.returned.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            pooled: self.buffers.len(),
        }
    }
}

fn round_up(size: usize) -> usize {
    if size == 0 {
        return SIZE_CLASS;
    }
    size.div_ceil(SIZE_CLASS) * SIZE_CLASS
}

/// Which sub-pool to borrow from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Direct,
    Heap,
}

/// Snapshot of a sub-pool's counters (§4.7 "Statistics").
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    pub created: usize,
    pub reused: usize,
    pub returned: usize,
    pub discarded: usize,
    pub pooled: usize,
}

impl PoolStats {
    /// Fraction of borrows served from the pool rather than freshly
    /// allocated.
    pub fn hit_rate(&self) -> f64 {
        let total = self.created + self.reused;
        if total == 0 {
            0.0
        } else {
            self.reused as f64 / total as f64
        }
    }

    /// Fraction of returns actually retained by the pool.
    pub fn return_rate(&self) -> f64 {
        let total = self.returned + self.discarded;
        if total == 0 {
            0.0
        } else {
            self.returned as f64 / total as f64
        }
    }
}

/// Fixed-capacity pool of reusable buffers (§4.7).
pub struct BufferPool {
    direct: SubPool,
    heap: SubPool,
    min_buffer_size: usize,
}

impl BufferPool {
    /// `max_direct_buffers`/`max_heap_buffers` bound how many spare buffers
    /// each sub-pool retains; `min_buffer_size` is the smallest capacity
    /// worth retaining on [`BufferPool::give_back`].
    pub fn new(max_direct_buffers: usize, max_heap_buffers: usize, min_buffer_size: usize) -> Self {
        Self {
            direct: SubPool::new(max_direct_buffers),
            heap: SubPool::new(max_heap_buffers),
            min_buffer_size,
        }
    }

    /// Borrow a buffer with capacity >= `min_capacity`, rounded up to the
    /// next [`SIZE_CLASS`]. Position 0, limit `min_capacity`.
    pub fn borrow_direct(&self, min_capacity: usize) -> ByteBuf {
        self.direct.borrow(min_capacity)
    }

    /// Same as [`BufferPool::borrow_direct`] but from the heap sub-pool.
    pub fn borrow_heap(&self, min_capacity: usize) -> ByteBuf {
        self.heap.borrow(min_capacity)
    }

    pub fn borrow(&self, kind: BufferKind, min_capacity: usize) -> ByteBuf {
        match kind {
            BufferKind::Direct => self.borrow_direct(min_capacity),
            BufferKind::Heap => self.borrow_heap(min_capacity),
        }
    }

    /// Return a buffer for reuse. A no-op is not needed for `None` here —
    /// Rust's ownership model means callers simply don't call this with
    /// nothing; ownership of `buf` makes the "returning null is a no-op"
    /// case structurally unrepresentable.
    pub fn return_direct(&self, buf: ByteBuf) {
        self.direct.give_back(buf, self.min_buffer_size);
    }

    pub fn return_heap(&self, buf: ByteBuf) {
        self.heap.give_back(buf, self.min_buffer_size);
    }

    pub fn give_back(&self, kind: BufferKind, buf: ByteBuf) {
        match kind {
            BufferKind::Direct => self.return_direct(buf),
            BufferKind::Heap => self.return_heap(buf),
        }
    }

    /// Drop all pooled buffers from both sub-pools.
    pub fn clear(&self) {
        while self.direct.buffers.pop().is_some() {}
        while self.heap.buffers.pop().is_some() {}
    }

    pub fn direct_stats(&self) -> PoolStats {
        self.direct.stats()
    }

    pub fn heap_stats(&self) -> PoolStats {
        self.heap.stats()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(64, 64, SIZE_CLASS)
    }
}
