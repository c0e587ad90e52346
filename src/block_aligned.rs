//! Block-aligned decorator (C4, §4.4).
//!
//! Rounds every request out to aligned `block_size`-sized boundaries before
//! delegating, so whatever sits behind it (typically a cache, per §9's
//! decorator ordering rule) only ever sees non-overlapping, aligned reads.

use std::sync::Arc;

use async_trait::async_trait;

use crate::buffer::ByteBuf;
use crate::buffer_pool::BufferPool;
use crate::error::{ConfigError, IoError};
use crate::range_reader::RangeReader;

/// Wraps `inner`, rounding every `(offset, length)` out to `block_size`
/// boundaries.
pub struct BlockAlignedReader<R> {
    inner: Arc<R>,
    block_size: u64,
    pool: Arc<BufferPool>,
    identity: String,
}

impl<R: RangeReader> BlockAlignedReader<R> {
    /// `block_size` must be a positive power of two (§4.4).
    pub fn new(inner: R, block_size: u64) -> Result<Self, ConfigError> {
        Self::with_pool(inner, block_size, Arc::new(BufferPool::default()))
    }

    /// Like [`BlockAlignedReader::new`], sharing a [`BufferPool`] across
    /// multiple decorators (e.g. the small memory-cache aligner and the
    /// large disk-cache aligner in the canonical stack, §9).
    pub fn with_pool(
        inner: R,
        block_size: u64,
        pool: Arc<BufferPool>,
    ) -> Result<Self, ConfigError> {
        if block_size == 0 || !block_size.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo(block_size));
        }
        let identity = format!("block-aligned[{}]:{}", block_size, inner.identity());
        Ok(Self {
            inner: Arc::new(inner),
            block_size,
            pool,
            identity,
        })
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn inner(&self) -> &Arc<R> {
        &self.inner
    }

    fn aligned_bounds(&self, offset: u64, length: usize) -> (u64, u64) {
        let b = self.block_size;
        let mask = !(b - 1);
        let aligned_start = offset & mask;
        let end = offset + length as u64;
        let aligned_end = (end + b - 1) & mask;
        (aligned_start, aligned_end)
    }
}

#[async_trait]
impl<R: RangeReader + 'static> RangeReader for BlockAlignedReader<R> {
    async fn read_into(
        &self,
        offset: u64,
        length: usize,
        target: &mut ByteBuf,
    ) -> Result<usize, IoError> {
        if target.remaining() < length {
            return Err(IoError::invalid_argument(
                &self.identity,
                format!(
                    "target buffer has {} remaining bytes, need {}",
                    target.remaining(),
                    length
                ),
            ));
        }
        if length == 0 {
            return Ok(0);
        }

        let (aligned_start, aligned_end) = self.aligned_bounds(offset, length);
        let b = self.block_size;
        let n_blocks = ((aligned_end - aligned_start) / b).max(1);

        let mut written = 0usize;
        let mut remaining = length;
        let mut cursor = offset;

        // The source always routes through a pooled, block-sized scratch
        // buffer, even for the common single-block case: the downstream
        // delegate always sees a full aligned block read either way (the
        // property §8/P7 cares about), and using one copy path for n==1
        // and n>1 keeps this decorator's logic in one place.
        for i in 0..n_blocks {
            let block_start = aligned_start + i * b;
            let mut block_buf = self.pool.borrow_heap(b as usize);
            let got = self
                .inner
                .read_into(block_start, b as usize, &mut block_buf)
                .await?;
            if got == 0 {
                self.pool.return_heap(block_buf);
                break;
            }

            let block_offset = cursor.saturating_sub(block_start) as usize;
            if block_offset >= got {
                self.pool.return_heap(block_buf);
                break;
            }

            let available = got - block_offset;
            let to_copy = available.min(remaining);
            target.put_slice(&block_buf.written()[block_offset..block_offset + to_copy]);
            self.pool.return_heap(block_buf);

            written += to_copy;
            remaining -= to_copy;
            cursor += to_copy as u64;

            if remaining == 0 {
                break;
            }
        }

        Ok(written)
    }

    async fn size(&self) -> Result<Option<u64>, IoError> {
        self.inner.size().await
    }

    fn identity(&self) -> &str {
        &self.identity
    }

    async fn close(&self) -> Result<(), IoError> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Delegate that records every `(offset, length)` it was asked to read,
    /// so tests can assert on the block-aligned shape of the requests it
    /// actually sees.
    struct CountingReader {
        data: Vec<u8>,
        identity: String,
        calls: std::sync::Mutex<Vec<(u64, usize)>>,
    }

    impl CountingReader {
        fn new(size: usize) -> Self {
            Self {
                data: (0..size).map(|i| (i % 256) as u8).collect(),
                identity: "counting://test".to_string(),
                calls: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl RangeReader for CountingReader {
        async fn read_into(
            &self,
            offset: u64,
            length: usize,
            target: &mut ByteBuf,
        ) -> Result<usize, IoError> {
            self.calls.lock().unwrap().push((offset, length));
            let start = offset as usize;
            if start >= self.data.len() {
                return Ok(0);
            }
            let end = (start + length).min(self.data.len());
            target.put_slice(&self.data[start..end]);
            Ok(end - start)
        }

        async fn size(&self) -> Result<Option<u64>, IoError> {
            Ok(Some(self.data.len() as u64))
        }

        fn identity(&self) -> &str {
            &self.identity
        }
    }

    #[tokio::test]
    async fn rejects_non_power_of_two_block_size() {
        let inner = CountingReader::new(1024);
        assert!(BlockAlignedReader::new(inner, 100).is_err());
    }

    #[tokio::test]
    async fn single_block_request_delegates_one_aligned_block() {
        let inner = CountingReader::new(64 * 1024);
        let aligned = BlockAlignedReader::new(inner, 4096).unwrap();

        let mut target = ByteBuf::with_capacity(50);
        let n = aligned.read_into(100, 50, &mut target).await.unwrap();
        assert_eq!(n, 50);
        assert_eq!(target.written(), &aligned.inner.data[100..150]);
        assert_eq!(aligned.inner.call_count(), 1);

        let calls = aligned.inner.calls.lock().unwrap();
        assert_eq!(calls[0], (0, 4096));
    }

    #[tokio::test]
    async fn three_sequential_small_reads_cause_three_delegate_calls() {
        // End-to-end scenario 3 from §8.
        let inner = CountingReader::new(64 * 1024);
        let aligned = BlockAlignedReader::new(inner, 4096).unwrap();

        for offset in [100u64, 200, 300] {
            let mut target = ByteBuf::with_capacity(50);
            aligned.read_into(offset, 50, &mut target).await.unwrap();
        }

        assert_eq!(aligned.inner.call_count(), 3);
        for (_, len) in aligned.inner.calls.lock().unwrap().iter() {
            assert_eq!(*len, 4096);
        }
    }

    #[tokio::test]
    async fn multi_block_read_spans_two_blocks() {
        let inner = CountingReader::new(1024);
        let aligned = BlockAlignedReader::new(inner, 256).unwrap();

        let mut target = ByteBuf::with_capacity(300);
        let n = aligned.read_into(100, 300, &mut target).await.unwrap();
        assert_eq!(n, 300);
        assert_eq!(target.written(), &aligned.inner.data[100..400]);
        assert_eq!(aligned.inner.call_count(), 2);
    }

    #[tokio::test]
    async fn short_last_block_is_truncated_at_eof() {
        let inner = CountingReader::new(300);
        let aligned = BlockAlignedReader::new(inner, 256).unwrap();

        let mut target = ByteBuf::with_capacity(30);
        let n = aligned.read_into(260, 30, &mut target).await.unwrap();
        assert_eq!(n, 30);
        assert_eq!(target.written(), &aligned.inner.data[260..290]);
    }

    #[tokio::test]
    async fn zero_length_read_never_delegates() {
        let inner = CountingReader::new(1024);
        let aligned = BlockAlignedReader::new(inner, 256).unwrap();
        let mut target = ByteBuf::with_capacity(0);
        let n = aligned.read_into(0, 0, &mut target).await.unwrap();
        assert_eq!(n, 0);
        assert_eq!(aligned.inner.call_count(), 0);
    }

    // P7 (block alignment): for any (o, L) with L <= B/2 and no EOF
    // truncation, the delegate sees exactly one read, and its length is B.
    // `offset_in_block` and `length` are each bounded by B/2 so their sum
    // never exceeds B — the real precondition for a read to stay inside a
    // single block; an unconstrained offset can straddle a block boundary
    // (e.g. offset=4095, length=2048 under B=4096) and correctly costs two
    // delegate calls, which isn't a bug this property should catch.
    proptest::proptest! {
        #[test]
        fn p7_small_reads_become_one_full_block(
            block_index in 0u64..16,
            offset_in_block in 0u64..=2048,
            length in 1usize..=2048,
        ) {
            const B: u64 = 4096;
            let offset = block_index * B + offset_in_block;
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let inner = CountingReader::new(64 * 1024);
                let aligned = BlockAlignedReader::new(inner, B).unwrap();
                let mut target = ByteBuf::with_capacity(length);
                aligned.read_into(offset, length, &mut target).await.unwrap();

                proptest::prop_assert_eq!(aligned.inner.call_count(), 1);
                let calls = aligned.inner.calls.lock().unwrap();
                proptest::prop_assert_eq!(calls[0].1, B as usize);
                Ok(())
            })?;
        }
    }
}
