//! Owned byte buffer with `position`/`limit` cursors.
//!
//! Rust has no direct equivalent of `java.nio.ByteBuffer`, but the read
//! contract (§4.1, §9) depends on exactly that shape: callers hand in a
//! buffer positioned wherever they like, readers only ever append at the
//! current position, and the limit is left untouched so a chain of
//! decorators can keep writing into the same buffer without losing the
//! caller's prefix. [`ByteBuf`] is that minimal subset.

/// A `Vec<u8>`-backed buffer with a write cursor (`position`) and a cap on
/// how far writes may go (`limit`).
///
/// Invariant: `position <= limit <= data.len()` always holds.
#[derive(Debug, Clone)]
pub struct ByteBuf {
    data: Vec<u8>,
    position: usize,
    limit: usize,
}

impl ByteBuf {
    /// Wrap a `Vec<u8>` whose full length is both the limit and the
    /// starting capacity; position starts at 0.
    pub fn new(data: Vec<u8>) -> Self {
        let limit = data.len();
        Self {
            data,
            position: 0,
            limit,
        }
    }

    /// Allocate a zero-filled buffer of `capacity` bytes, limit == capacity,
    /// position == 0. This is what backends write into before returning.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(vec![0u8; capacity])
    }

    /// Current write position.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Current limit (exclusive upper bound for writes/reads).
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Bytes writable before hitting the limit.
    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.position)
    }

    /// Total backing capacity, independent of position/limit.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Move the limit. Must stay within backing capacity; the caller (a
    /// decorator narrowing a sub-read) is responsible for correctness.
    pub fn set_limit(&mut self, limit: usize) {
        debug_assert!(limit <= self.data.len());
        self.limit = limit.min(self.data.len());
        if self.position > self.limit {
            self.position = self.limit;
        }
    }

    /// Reposition the write cursor without touching the limit.
    pub fn set_position(&mut self, position: usize) {
        debug_assert!(position <= self.limit);
        self.position = position.min(self.limit);
    }

    /// Reset to (position=0, limit=capacity), as returned from the buffer
    /// pool (§4.7 invariant).
    pub fn clear(&mut self) {
        self.position = 0;
        self.limit = self.data.len();
    }

    /// Flip: limit = position, position = 0. Prepares a just-filled buffer
    /// for reading (§4.1 "companion convenience form").
    pub fn flip(&mut self) {
        self.limit = self.position;
        self.position = 0;
    }

    /// Write `src` at the current position, advancing it by `src.len()`.
    ///
    /// # Panics
    /// Panics if `src.len() > remaining()`; callers must validate capacity
    /// first (this is an internal invariant, not a user-facing error path).
    pub fn put_slice(&mut self, src: &[u8]) {
        assert!(
            src.len() <= self.remaining(),
            "put_slice: {} bytes exceed remaining capacity {}",
            src.len(),
            self.remaining()
        );
        let start = self.position;
        let end = start + src.len();
        self.data[start..end].copy_from_slice(src);
        self.position = end;
    }

    /// The bytes between position 0 and the current position — i.e. what
    /// has been written so far, ready for the caller to consume without
    /// flipping (callers "read bytes directly", per I3).
    pub fn written(&self) -> &[u8] {
        &self.data[..self.position]
    }

    /// The bytes between the current position and limit — the unused
    /// writable region, handed to a backend's `read_unflipped` hook.
    pub fn writable(&mut self) -> &mut [u8] {
        &mut self.data[self.position..self.limit]
    }

    /// Consume the buffer, returning the full backing store.
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Borrow the full backing store regardless of cursors.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl From<Vec<u8>> for ByteBuf {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}
