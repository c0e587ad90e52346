//! The RangeReader contract (C1) and its template pipeline (C2).
//!
//! [`RangeReader`] is the uniform surface every backend and decorator
//! implements. [`RangeSource`] is the narrower hook concrete backends
//! provide; [`dispatch_read`] is the free function that performs
//! validation, EOF clamping, and buffer bookkeeping once, in front of every
//! hook (§4.2, §9 "Replacing inheritance with composition" — a trait plus a
//! provided wrapper function stands in for the source's `AbstractRangeReader`
//! template-method hierarchy).

use async_trait::async_trait;

use crate::buffer::ByteBuf;
use crate::error::IoError;

/// Uniform byte-range read surface (§4.1).
///
/// Implemented directly by every concrete backend (via [`RangeSource`] +
/// [`dispatch_read`]) and by every decorator (which implements it directly,
/// delegating to an inner `RangeReader`).
#[async_trait]
pub trait RangeReader: Send + Sync {
    /// Read up to `length` bytes starting at `offset` into `target`,
    /// starting at `target`'s current position.
    ///
    /// Returns the number of bytes written. Returns `Ok(0)` when `offset`
    /// is at or beyond end-of-resource. Advances `target`'s position by the
    /// return value; `target`'s limit is left as the caller set it (I3).
    async fn read_into(
        &self,
        offset: u64,
        length: usize,
        target: &mut ByteBuf,
    ) -> Result<usize, IoError>;

    /// Convenience form: allocate a buffer, read into it, and narrow its
    /// limit to the bytes actually read. Callers consume the result via
    /// [`ByteBuf::written`] (position tracks bytes read), matching every
    /// other read path in this crate.
    async fn read(&self, offset: u64, length: usize) -> Result<ByteBuf, IoError> {
        let mut target = ByteBuf::with_capacity(length);
        let read = self.read_into(offset, length, &mut target).await?;
        target.set_limit(read);
        Ok(target)
    }

    /// The resource's total length, if known (§4.1, §3 ResourceSize).
    /// May perform a one-time probe; implementations memoize the result.
    async fn size(&self) -> Result<Option<u64>, IoError>;

    /// Stable textual identifier for diagnostics and cache-key scoping
    /// (§3 ResourceIdentity). Stable for the lifetime of the instance (I4).
    fn identity(&self) -> &str;

    /// Release resources. Idempotent; decorators forward to their delegate
    /// exactly once even under repeated calls.
    async fn close(&self) -> Result<(), IoError> {
        Ok(())
    }
}

/// An `Arc`-wrapped reader is itself a reader. This is what lets decorators
/// (memory cache, disk cache, block-aligned) hold a type-erased
/// `Arc<dyn RangeReader>` delegate and still compose freely, since a
/// provider's `create()` (§4.8) hands back a boxed/arced reader rather than
/// a concrete generic type.
#[async_trait]
impl<T: RangeReader + ?Sized> RangeReader for std::sync::Arc<T> {
    async fn read_into(
        &self,
        offset: u64,
        length: usize,
        target: &mut ByteBuf,
    ) -> Result<usize, IoError> {
        (**self).read_into(offset, length, target).await
    }

    async fn size(&self) -> Result<Option<u64>, IoError> {
        (**self).size().await
    }

    fn identity(&self) -> &str {
        (**self).identity()
    }

    async fn close(&self) -> Result<(), IoError> {
        (**self).close().await
    }
}

/// The hook concrete backends implement; everything else (validation,
/// clamping, buffer bookkeeping) is handled once by [`dispatch_read`].
#[async_trait]
pub trait RangeSource: Send + Sync {
    /// Fetch exactly `length` bytes (already clamped to the resource size
    /// and the target's capacity) starting at `offset`, writing them into
    /// `target` at its current position. Must return the exact count
    /// written and leave the position advanced by that count.
    async fn fetch_into(
        &self,
        offset: u64,
        length: usize,
        target: &mut ByteBuf,
    ) -> Result<usize, IoError>;

    /// Probe (and the implementation should memoize) the resource size.
    /// `None` means "unknown" (e.g. a chunked HTTP response with no
    /// `Content-Length`).
    async fn probe_size(&self) -> Result<Option<u64>, IoError>;

    /// Stable identifier, forwarded to [`RangeReader::identity`].
    fn identity(&self) -> &str;
}

/// The template pipeline (§4.2): validate, resolve actual length against a
/// known resource size, narrow the target's limit to that length, delegate
/// to the hook, then restore the caller's original limit.
///
/// Every concrete backend's [`RangeReader::read_into`] is implemented as a
/// one-line call to this function.
pub async fn dispatch_read<S>(
    source: &S,
    offset: u64,
    length: usize,
    target: &mut ByteBuf,
) -> Result<usize, IoError>
where
    S: RangeSource + ?Sized,
{
    if target.remaining() < length {
        return Err(IoError::invalid_argument(
            source.identity(),
            format!(
                "target buffer has {} remaining bytes, need {}",
                target.remaining(),
                length
            ),
        ));
    }

    let size = source.probe_size().await?;
    let actual_length = match size {
        Some(total) => {
            if offset >= total {
                return Ok(0);
            }
            length.min((total - offset) as usize)
        }
        None => length,
    };

    if actual_length == 0 {
        return Ok(0);
    }

    let original_limit = target.limit();
    let start = target.position();
    target.set_limit(start + actual_length);

    let result = source.fetch_into(offset, actual_length, target).await;

    let written = target.position();
    target.set_limit(original_limit.max(written));

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSource {
        data: Vec<u8>,
        identity: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RangeSource for FixedSource {
        async fn fetch_into(
            &self,
            offset: u64,
            length: usize,
            target: &mut ByteBuf,
        ) -> Result<usize, IoError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let start = offset as usize;
            let slice = &self.data[start..start + length];
            target.put_slice(slice);
            Ok(slice.len())
        }

        async fn probe_size(&self) -> Result<Option<u64>, IoError> {
            Ok(Some(self.data.len() as u64))
        }

        fn identity(&self) -> &str {
            &self.identity
        }
    }

    fn fixture() -> FixedSource {
        FixedSource {
            data: (0..=255u16).map(|i| (i % 256) as u8).take(1024).collect(),
            identity: "fixed://test".to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn reads_within_bounds() {
        let src = fixture();
        let mut target = ByteBuf::with_capacity(16);
        let n = dispatch_read(&src, 100, 16, &mut target).await.unwrap();
        assert_eq!(n, 16);
        assert_eq!(target.written(), &src.data[100..116]);
    }

    #[tokio::test]
    async fn clamps_at_eof() {
        let src = fixture();
        let mut target = ByteBuf::with_capacity(100);
        let n = dispatch_read(&src, 1020, 100, &mut target).await.unwrap();
        assert_eq!(n, 4);
        assert_eq!(target.written(), &src.data[1020..1024]);
    }

    #[tokio::test]
    async fn returns_zero_past_eof() {
        let src = fixture();
        let mut target = ByteBuf::with_capacity(10);
        let n = dispatch_read(&src, 2000, 10, &mut target).await.unwrap();
        assert_eq!(n, 0);
        assert_eq!(src.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejects_undersized_target() {
        let src = fixture();
        let mut target = ByteBuf::with_capacity(4);
        let err = dispatch_read(&src, 0, 16, &mut target).await.unwrap_err();
        assert!(matches!(err, IoError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn preserves_caller_limit_after_read() {
        let src = fixture();
        let mut target = ByteBuf::with_capacity(64);
        target.set_limit(32);
        let n = dispatch_read(&src, 0, 16, &mut target).await.unwrap();
        assert_eq!(n, 16);
        assert_eq!(target.limit(), 32);
        assert_eq!(target.position(), 16);
    }

    #[tokio::test]
    async fn additive_writes_from_two_sources_into_one_buffer() {
        let a = fixture();
        let b = fixture();
        let mut target = ByteBuf::with_capacity(32);
        dispatch_read(&a, 0, 16, &mut target).await.unwrap();
        dispatch_read(&b, 100, 16, &mut target).await.unwrap();
        assert_eq!(&target.written()[..16], &a.data[0..16]);
        assert_eq!(&target.written()[16..32], &b.data[100..116]);
    }

    // P1 (bounds): bytes_read = min(L, max(0, size - o)) for any (offset,
    // length) against a resource of known size.
    proptest::proptest! {
        #[test]
        fn p1_bounds_hold_for_arbitrary_ranges(offset in 0u64..2048, length in 0usize..512) {
            let src = fixture();
            let rt = tokio::runtime::Runtime::new().unwrap();
            let mut target = ByteBuf::with_capacity(length);
            let n = rt.block_on(dispatch_read(&src, offset, length, &mut target)).unwrap();

            let size = src.data.len() as u64;
            let expected = if offset >= size {
                0
            } else {
                length.min((size - offset) as usize)
            };
            proptest::prop_assert_eq!(n, expected);
            proptest::prop_assert!(n <= length);
        }
    }
}
