//! In-process memory cache decorator (C5, §4.5).
//!
//! Backed by [`moka::future::Cache`] for weight/entry-count bounds and
//! time-to-idle expiry (SPEC_FULL Open Question resolution 2). Single-flight
//! coordination is layered on top with the same `Notify`-per-key pattern
//! `wsi_streamer::io::block_cache` used for its block fetches, because it
//! gives exact control over which caller is attributed the miss and which
//! are attributed hits (§8 scenario 4: 1 miss, 7 hits for 8 concurrent
//! identical reads) — `moka`'s own `get_with` single-flight doesn't expose
//! that per-caller distinction.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use moka::future::Cache;
use moka::notification::RemovalCause;
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::buffer::ByteBuf;
use crate::error::IoError;
use crate::range_reader::RangeReader;

/// Identifies one cached range: the delegate's resource identity plus the
/// `(offset, length)` requested (§3 "CacheKey (memory cache)").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub resource_identity: String,
    pub offset: u64,
    pub length: usize,
}

/// Snapshot of hit/miss/eviction counters (§4.5 "Statistics").
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub load_failures: u64,
    pub average_load_time: Duration,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    load_failures: AtomicU64,
    load_nanos: AtomicU64,
}

/// Configuration for a [`MemoryCacheReader`] (§4.5 "Configuration", §9
/// "Replacing fluent builders").
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheConfig {
    /// Bound the cache by entry count. Mutually governing with
    /// `maximum_weight` — see [`MemoryCacheConfig::build`].
    pub maximum_size: Option<u64>,
    /// Bound the cache by total bytes stored.
    pub maximum_weight: Option<u64>,
    /// Evict an entry if it goes unread for this long.
    pub expire_after_access: Option<Duration>,
    /// When set, this cache keys and stores by aligned, non-overlapping
    /// blocks of this size rather than the caller's raw `(offset, length)`,
    /// so two callers reading different sub-ranges of the same block share
    /// one entry (§9 "cache sees only aligned keys").
    pub block_aligned: Option<u64>,
}

impl MemoryCacheConfig {
    /// Build a [`MemoryCacheReader`] wrapping `delegate`.
    pub fn build(
        self,
        delegate: impl RangeReader + 'static,
    ) -> Result<MemoryCacheReader, crate::error::ConfigError> {
        if let Some(b) = self.block_aligned {
            if b == 0 || !b.is_power_of_two() {
                return Err(crate::error::ConfigError::NotPowerOfTwo(b));
            }
        }
        Ok(MemoryCacheReader::new(Arc::new(delegate), &self))
    }
}

/// Bounded, single-flight in-process cache of previously fetched ranges
/// (C5, §4.5).
pub struct MemoryCacheReader {
    delegate: Arc<dyn RangeReader>,
    cache: Cache<CacheKey, Arc<Vec<u8>>>,
    in_flight: DashMap<CacheKey, Arc<Notify>>,
    counters: Arc<Counters>,
    /// When set, `read_into` aligns every request to this block size before
    /// computing a [`CacheKey`], instead of keying by the caller's raw
    /// `(offset, length)` (§9 "cache sees only aligned keys").
    block_aligned: Option<u64>,
    identity: String,
}

impl MemoryCacheReader {
    /// `config.block_aligned`, if set, must already be a validated positive
    /// power of two — [`MemoryCacheConfig::build`] is the checked entry
    /// point; this constructor trusts its caller the way the rest of this
    /// crate's `XyzReader::new` constructors do.
    pub fn new(delegate: Arc<dyn RangeReader>, config: &MemoryCacheConfig) -> Self {
        let counters = Arc::new(Counters::default());
        let evictions = counters.clone();

        let mut builder = Cache::builder().eviction_listener(move |_k, _v, cause| {
            if !matches!(cause, RemovalCause::Replaced) {
                evictions.evictions.fetch_add(1, Ordering::Relaxed);
            }
        });

        builder = match (config.maximum_weight, config.maximum_size) {
            (Some(weight), _) => builder
                .weigher(|_k: &CacheKey, v: &Arc<Vec<u8>>| v.len().min(u32::MAX as usize) as u32)
                .max_capacity(weight),
            (None, Some(n)) => builder.max_capacity(n),
            (None, None) => builder,
        };
        if let (Some(_), Some(n)) = (config.maximum_weight, config.maximum_size) {
            // moka bounds one dimension at a time; weight wins, entry count
            // is logged as a soft target rather than independently enforced
            // (see DESIGN.md).
            debug!(maximum_size = n, "entry-count bound is advisory when maximum_weight is also set");
        }
        if let Some(ttl) = config.expire_after_access {
            builder = builder.time_to_idle(ttl);
        }

        let identity = match config.block_aligned {
            Some(b) => format!("memory-cached:block-aligned[{b}]:{}", delegate.identity()),
            None => format!("memory-cached:{}", delegate.identity()),
        };
        Self {
            delegate,
            cache: builder.build(),
            in_flight: DashMap::new(),
            counters,
            block_aligned: config.block_aligned,
            identity,
        }
    }

    pub fn stats(&self) -> MemoryCacheStats {
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let load_nanos = self.counters.load_nanos.load(Ordering::Relaxed);
        MemoryCacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses,
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            load_failures: self.counters.load_failures.load(Ordering::Relaxed),
            average_load_time: if misses == 0 {
                Duration::ZERO
            } else {
                Duration::from_nanos(load_nanos / misses)
            },
        }
    }

    /// Fetch `key` from the delegate, store it, and return it — executed by
    /// exactly the caller who wins leadership for this key (§5 single-flight
    /// atomicity; §7 "memory cache does not cache failures").
    async fn load(&self, key: CacheKey) -> Result<Arc<Vec<u8>>, IoError> {
        let start = Instant::now();
        let mut scratch = ByteBuf::with_capacity(key.length);
        let result = self
            .delegate
            .read_into(key.offset, key.length, &mut scratch)
            .await;
        self.counters
            .load_nanos
            .fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);

        match result {
            Ok(n) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                let data = Arc::new(scratch.written()[..n].to_vec());
                self.cache.insert(key, data.clone()).await;
                Ok(data)
            }
            Err(e) => {
                self.counters.load_failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Single-flight fetch of one key: a `moka` hit, or become the leader
    /// that loads it (§5 single-flight atomicity), while followers wait on
    /// the same `Notify`.
    async fn fetch(&self, key: CacheKey) -> Result<Arc<Vec<u8>>, IoError> {
        loop {
            if let Some(data) = self.cache.get(&key).await {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                trace!(offset = key.offset, length = key.length, "memory cache hit");
                return Ok(data);
            }

            // Either join an in-flight load or win leadership and register
            // our Notify atomically, so late-arriving waiters always find
            // it (§5 single-flight atomicity).
            let notify = Arc::new(Notify::new());
            match self.in_flight.entry(key.clone()) {
                dashmap::mapref::entry::Entry::Occupied(o) => {
                    let existing = o.get().clone();
                    drop(o);
                    existing.notified().await;
                    continue;
                }
                dashmap::mapref::entry::Entry::Vacant(v) => {
                    v.insert(notify.clone());
                }
            }

            debug!(
                offset = key.offset,
                length = key.length,
                identity = %self.delegate.identity(),
                "memory cache miss, loading"
            );
            let result = self.load(key.clone()).await;
            self.in_flight.remove(&key);
            notify.notify_waiters();
            return result;
        }
    }
}

#[async_trait]
impl RangeReader for MemoryCacheReader {
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

        let identity = self.delegate.identity().to_string();

        let Some(b) = self.block_aligned else {
            let key = CacheKey { resource_identity: identity, offset, length };
            let data = self.fetch(key).await?;
            target.put_slice(&data);
            return Ok(data.len());
        };

        // Aligned path: key and store by the full covering block, not the
        // caller's raw sub-range, so overlapping requests into the same
        // block coalesce to one cached entry (§9 "cache sees only aligned
        // keys").
        let mask = !(b - 1);
        let end = offset + length as u64;
        let aligned_start = offset & mask;
        let aligned_end = (end + b - 1) & mask;
        let n_blocks = ((aligned_end - aligned_start) / b).max(1);

        let mut written = 0usize;
        let mut remaining = length;
        let mut cursor = offset;
        for i in 0..n_blocks {
            let block_start = aligned_start + i * b;
            let key = CacheKey {
                resource_identity: identity.clone(),
                offset: block_start,
                length: b as usize,
            };
            let data = self.fetch(key).await?;
            let block_offset = (cursor - block_start) as usize;
            if block_offset >= data.len() {
                break;
            }
            let available = data.len() - block_offset;
            let to_copy = available.min(remaining);
            target.put_slice(&data[block_offset..block_offset + to_copy]);
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
        self.delegate.size().await
    }

    fn identity(&self) -> &str {
        &self.identity
    }

    async fn close(&self) -> Result<(), IoError> {
        self.delegate.close().await
    }
}
