//! Persistent on-disk cache decorator (C6, §4.6).
//!
//! One file per cached range under `cache_directory`, written via
//! temp-file-then-atomic-rename and indexed by an in-memory LRU rebuilt at
//! open from a small sidecar (`.index.tsv`). Single-flight coordination
//! mirrors [`crate::memory_cache`]'s `Notify`-per-key pattern; eviction adds
//! a per-key reference count so a file is never unlinked while a reader is
//! mid-copy from it (§4.6 "Eviction must not race with in-flight readers").

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use lru::LruCache;
use sha2::{Digest as _, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, trace, warn};

use crate::buffer::ByteBuf;
use crate::error::IoError;
use crate::range_reader::RangeReader;

const TMP_PREFIX: &str = ".tmp.";
const INDEX_FILE: &str = ".index.tsv";

/// Identifies one cached range: the delegate's resource identity plus the
/// `(offset, length)` requested (§3 "CacheKey (disk cache)" — here the
/// struct itself, hashed down to a filename by [`digest_for`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    resource_identity: String,
    offset: u64,
    length: usize,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    digest: String,
    len: u64,
}

struct State {
    index: LruCache<CacheKey, IndexEntry>,
    total_bytes: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    corruption_recoveries: AtomicU64,
}

/// Snapshot of disk-cache statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskCacheStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub corruption_recoveries: u64,
}

/// Configuration for a [`DiskCacheReader`] (§4.6 "Configuration").
#[derive(Debug, Clone)]
pub struct DiskCacheConfig {
    pub cache_directory: PathBuf,
    pub max_bytes: u64,
    /// When set, cached entries are aligned blocks of this size (typical:
    /// 1 MiB): the cache key and the bytes persisted to disk are always a
    /// full block, computed from the caller's `(offset, length)` before the
    /// delegate is touched, not a post-hoc slice of an aligned delegate
    /// read (§4.6, §9 "cache sees only aligned keys").
    pub block_size: Option<u64>,
    /// Rescan the directory for orphaned entry files beyond what the
    /// sidecar index names, and prune them.
    pub sweep_on_open: bool,
}

impl DiskCacheConfig {
    pub fn new(cache_directory: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            cache_directory: cache_directory.into(),
            max_bytes,
            block_size: None,
            sweep_on_open: false,
        }
    }

    /// Build a [`DiskCacheReader`] wrapping `delegate`, creating
    /// `cache_directory` if needed and rebuilding the index from the
    /// sidecar (§4.6 "State").
    pub async fn build(
        self,
        delegate: impl RangeReader + 'static,
    ) -> Result<DiskCacheReader, IoError> {
        if let Some(b) = self.block_size {
            if b == 0 || !b.is_power_of_two() {
                return Err(IoError::invalid_argument(
                    "disk-cache",
                    format!("block_size {b} must be a positive power of two"),
                ));
            }
        }

        tokio::fs::create_dir_all(&self.cache_directory)
            .await
            .map_err(IoError::from)?;

        let delegate: Arc<dyn RangeReader> = Arc::new(delegate);
        let identity = match self.block_size {
            Some(b) => format!("disk-cached:block-aligned[{b}]:{}", delegate.identity()),
            None => format!("disk-cached:{}", delegate.identity()),
        };
        let reader = DiskCacheReader {
            delegate,
            root: self.cache_directory.clone(),
            max_bytes: self.max_bytes,
            block_size: self.block_size,
            identity,
            state: Mutex::new(State {
                index: LruCache::unbounded(),
                total_bytes: 0,
            }),
            refcounts: DashMap::new(),
            in_flight: DashMap::new(),
            counters: Counters::default(),
        };
        reader.open(self.sweep_on_open).await?;
        Ok(reader)
    }
}

fn digest_for(key: &CacheKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.resource_identity.as_bytes());
    hasher.update(0u8.to_le_bytes());
    hasher.update(key.offset.to_le_bytes());
    hasher.update((key.length as u64).to_le_bytes());
    let full = hasher.finalize();
    hex::encode(&full[..16])
}

fn random_suffix() -> String {
    format!("{:016x}", rand::random::<u64>())
}

/// Persistent per-key on-disk cache of previously fetched ranges (C6,
/// §4.6).
pub struct DiskCacheReader {
    delegate: Arc<dyn RangeReader>,
    root: PathBuf,
    max_bytes: u64,
    /// When set, cache keys are this-sized aligned blocks rather than the
    /// caller's raw `(offset, length)`, so overlapping requests into the
    /// same block share one on-disk entry (§4.6, §9 "cache sees only
    /// aligned keys").
    block_size: Option<u64>,
    identity: String,
    state: Mutex<State>,
    /// Active-reader counts per key, consulted by eviction so a file is
    /// never unlinked mid-read.
    refcounts: DashMap<CacheKey, Arc<AtomicUsize>>,
    in_flight: DashMap<CacheKey, Arc<Notify>>,
    counters: Counters,
}

impl DiskCacheReader {
    pub fn stats(&self) -> DiskCacheStats {
        // entries/total_bytes are read without the async lock in the common
        // case via try_lock; fall back to 0 only if genuinely contended at
        // the exact instant of the call (stats are inherently approximate
        // under concurrent mutation).
        let (entries, total_bytes) = match self.state.try_lock() {
            Ok(st) => (st.index.len(), st.total_bytes),
            Err(_) => (0, 0),
        };
        DiskCacheStats {
            entries,
            total_bytes,
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            corruption_recoveries: self.counters.corruption_recoveries.load(Ordering::Relaxed),
        }
    }

    async fn open(&self, sweep: bool) -> Result<(), IoError> {
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(d) => d,
            Err(e) => return Err(IoError::from(e)),
        };

        let mut entries_on_disk: HashMap<String, u64> = HashMap::new();
        while let Some(ent) = dir.next_entry().await.map_err(IoError::from)? {
            let name = ent.file_name().to_string_lossy().into_owned();
            if name.starts_with(TMP_PREFIX) {
                let _ = tokio::fs::remove_file(ent.path()).await;
                continue;
            }
            if name == INDEX_FILE {
                continue;
            }
            if let Ok(meta) = ent.metadata().await {
                entries_on_disk.insert(name, meta.len());
            }
        }

        let mut known_digests: HashSet<String> = HashSet::new();
        let sidecar_path = self.root.join(INDEX_FILE);
        if let Ok(contents) = tokio::fs::read_to_string(&sidecar_path).await {
            let mut st = self.state.lock().await;
            for line in contents.lines() {
                let mut parts = line.splitn(5, '\t');
                let (Some(identity), Some(offset), Some(length), Some(digest), Some(len)) = (
                    parts.next(),
                    parts.next(),
                    parts.next(),
                    parts.next(),
                    parts.next(),
                ) else {
                    continue;
                };
                let (Ok(offset), Ok(length), Ok(len)) = (
                    offset.parse::<u64>(),
                    length.parse::<usize>(),
                    len.parse::<u64>(),
                ) else {
                    continue;
                };
                if entries_on_disk.get(digest) == Some(&len) {
                    known_digests.insert(digest.to_string());
                    st.total_bytes += len;
                    st.index.put(
                        CacheKey {
                            resource_identity: identity.to_string(),
                            offset,
                            length,
                        },
                        IndexEntry {
                            digest: digest.to_string(),
                            len,
                        },
                    );
                }
            }
            debug!(entries = st.index.len(), "disk cache index rebuilt from sidecar");
        }

        if sweep {
            for digest in entries_on_disk.keys() {
                if !known_digests.contains(digest) {
                    warn!(digest, "pruning orphaned disk cache entry on sweep");
                    let _ = tokio::fs::remove_file(self.root.join(digest)).await;
                }
            }
        }

        Ok(())
    }

    async fn persist_index(&self) {
        let mut buf = String::new();
        {
            let st = self.state.lock().await;
            for (k, v) in st.index.iter() {
                buf.push_str(&format!(
                    "{}\t{}\t{}\t{}\t{}\n",
                    k.resource_identity, k.offset, k.length, v.digest, v.len
                ));
            }
        }
        let tmp = self.root.join(format!("{TMP_PREFIX}{}", random_suffix()));
        if tokio::fs::write(&tmp, &buf).await.is_ok() {
            let _ = tokio::fs::rename(&tmp, self.root.join(INDEX_FILE)).await;
        }
    }

    /// Invalidate a corrupt or missing entry: drop it from the index (the
    /// underlying file, if any, is removed best-effort).
    async fn invalidate(&self, key: &CacheKey) {
        let removed = {
            let mut st = self.state.lock().await;
            let entry = st.index.pop(key);
            if let Some(e) = &entry {
                st.total_bytes = st.total_bytes.saturating_sub(e.len);
            }
            entry
        };
        if let Some(entry) = removed {
            let _ = tokio::fs::remove_file(self.root.join(&entry.digest)).await;
        }
    }

    /// Attempt the fast path: if `key` is indexed, read it from disk and
    /// validate its length. Returns `Ok(None)` on a clean miss or a
    /// detected-and-invalidated corruption (§4.6 "On hit").
    async fn try_hit(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, IoError> {
        let digest = {
            let mut st = self.state.lock().await;
            match st.index.get(key) {
                Some(e) => e.digest.clone(),
                None => return Ok(None),
            }
        };

        let rc = self
            .refcounts
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
            .clone();
        rc.fetch_add(1, Ordering::SeqCst);
        let result = tokio::fs::read(self.root.join(&digest)).await;
        rc.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(bytes) => {
                let expected_len = {
                    let st = self.state.lock().await;
                    st.index.peek(key).map(|e| e.len)
                };
                if expected_len == Some(bytes.len() as u64) {
                    trace!(identity = %self.identity, "disk cache hit");
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    Ok(Some(bytes))
                } else {
                    warn!(
                        identity = %self.identity,
                        "disk cache entry length mismatch, treating as corrupt"
                    );
                    self.counters.corruption_recoveries.fetch_add(1, Ordering::Relaxed);
                    self.invalidate(key).await;
                    Ok(None)
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(identity = %self.identity, "disk cache entry file missing, treating as corrupt");
                self.counters.corruption_recoveries.fetch_add(1, Ordering::Relaxed);
                self.invalidate(key).await;
                Ok(None)
            }
            Err(e) => Err(IoError::from(e)),
        }
    }

    /// Fetch `key` from the delegate and persist it to disk (§4.6 "On
    /// miss"). Executed by exactly the single-flight leader.
    async fn load(&self, key: &CacheKey) -> Result<Vec<u8>, IoError> {
        let mut scratch = ByteBuf::with_capacity(key.length);
        let n = self
            .delegate
            .read_into(key.offset, key.length, &mut scratch)
            .await?;
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        let data = scratch.written()[..n].to_vec();

        let digest = digest_for(key);
        let tmp_path = self.root.join(format!("{TMP_PREFIX}{}", random_suffix()));
        {
            let mut f = tokio::fs::File::create(&tmp_path)
                .await
                .map_err(IoError::from)?;
            f.write_all(&data).await.map_err(IoError::from)?;
            f.sync_all().await.map_err(IoError::from)?;
        }
        let final_path = self.root.join(&digest);
        tokio::fs::rename(&tmp_path, &final_path)
            .await
            .map_err(IoError::from)?;

        {
            let mut st = self.state.lock().await;
            let new_entry = IndexEntry {
                digest: digest.clone(),
                len: data.len() as u64,
            };
            if let Some(old) = st.index.put(key.clone(), new_entry) {
                st.total_bytes = st.total_bytes.saturating_sub(old.len);
            }
            st.total_bytes += data.len() as u64;
        }

        self.evict_if_needed().await;
        self.persist_index().await;
        Ok(data)
    }

    /// Single-flight fetch of one key: hit the disk index, or become the
    /// leader that loads it from the delegate and persists it (§4.6
    /// "On miss"), while followers wait on the same `Notify`.
    async fn fetch(&self, key: &CacheKey) -> Result<Vec<u8>, IoError> {
        loop {
            if let Some(data) = self.try_hit(key).await? {
                return Ok(data);
            }

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

            let result = self.load(key).await;
            self.in_flight.remove(key);
            notify.notify_waiters();
            return result;
        }
    }

    /// Evict least-recently-used entries until `total_bytes <= max_bytes`,
    /// skipping entries with an active reader (§4.6 "Eviction").
    async fn evict_if_needed(&self) {
        let mut victims = Vec::new();
        {
            let mut st = self.state.lock().await;
            let mut requeue = Vec::new();
            let attempts = st.index.len();
            for _ in 0..attempts {
                if st.total_bytes <= self.max_bytes {
                    break;
                }
                let Some((k, v)) = st.index.pop_lru() else {
                    break;
                };
                let busy = self
                    .refcounts
                    .get(&k)
                    .map(|rc| rc.load(Ordering::SeqCst) > 0)
                    .unwrap_or(false);
                if busy {
                    requeue.push((k, v));
                    continue;
                }
                st.total_bytes = st.total_bytes.saturating_sub(v.len);
                victims.push((k, v));
            }
            for (k, v) in requeue {
                st.index.put(k, v);
            }
        }
        if !victims.is_empty() {
            debug!(count = victims.len(), "evicting disk cache entries");
        }
        for (_, v) in &victims {
            let _ = tokio::fs::remove_file(self.root.join(&v.digest)).await;
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[async_trait]
impl RangeReader for DiskCacheReader {
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

        let Some(b) = self.block_size else {
            let key = CacheKey { resource_identity: identity, offset, length };
            let data = self.fetch(&key).await?;
            target.put_slice(&data);
            return Ok(data.len());
        };

        // Aligned path: the cache key and the bytes fetched/stored are
        // always a full block, never the caller's raw sub-range, so two
        // overlapping requests into the same block share one entry (§9).
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
            let data = self.fetch(&key).await?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;

    struct CountingReader {
        data: Vec<u8>,
        identity: String,
        calls: StdAtomicUsize,
    }

    impl CountingReader {
        fn new(size: usize) -> Self {
            Self {
                data: (0..size).map(|i| (i % 256) as u8).collect(),
                identity: "counting://test".to_string(),
                calls: StdAtomicUsize::new(0),
            }
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
            self.calls.fetch_add(1, Ordering::SeqCst);
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
    async fn block_aligned_4kib_coalesces_nearby_reads() {
        // End-to-end scenario 5 from §8.
        let dir = tempfile::tempdir().unwrap();
        let inner = CountingReader::new(64 * 1024);
        let cfg = DiskCacheConfig {
            cache_directory: dir.path().to_path_buf(),
            max_bytes: 1024 * 1024,
            block_size: Some(4096),
            sweep_on_open: false,
        };
        let cache = cfg.build(inner).await.unwrap();

        cache.read(2000, 1).await.unwrap();
        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.total_bytes, 4096);

        cache.read(3000, 100).await.unwrap();
        assert_eq!(cache.stats().entries, 1);

        cache.read(5000, 50).await.unwrap();
        assert_eq!(cache.stats().entries, 2);
    }

    #[tokio::test]
    async fn reopening_the_same_directory_observes_a_hit() {
        // P5: disk cache durability across reopen.
        let dir = tempfile::tempdir().unwrap();
        let inner = Arc::new(CountingReader::new(4096));

        {
            let cfg = DiskCacheConfig::new(dir.path(), 1024 * 1024);
            let cache = cfg.build(inner.clone()).await.unwrap();
            cache.read(0, 512).await.unwrap();
        }
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        {
            let cfg = DiskCacheConfig::new(dir.path(), 1024 * 1024);
            let cache = cfg.build(inner.clone()).await.unwrap();
            let buf = cache.read(0, 512).await.unwrap();
            assert_eq!(buf.written().len(), 512);
        }
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deleting_the_cache_file_triggers_one_refetch() {
        // P6: disk cache corruption recovery.
        let dir = tempfile::tempdir().unwrap();
        let inner = Arc::new(CountingReader::new(4096));
        let cfg = DiskCacheConfig::new(dir.path(), 1024 * 1024);
        let cache = cfg.build(inner.clone()).await.unwrap();

        let first = cache.read(0, 256).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        while let Some(e) = entries.next_entry().await.unwrap() {
            let name = e.file_name().to_string_lossy().into_owned();
            if name != INDEX_FILE && !name.starts_with(TMP_PREFIX) {
                tokio::fs::remove_file(e.path()).await.unwrap();
            }
        }

        let second = cache.read(0, 256).await.unwrap();
        assert_eq!(first.written(), second.written());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().corruption_recoveries, 1);
    }

    #[tokio::test]
    async fn leftover_temp_files_are_removed_on_open() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(format!("{TMP_PREFIX}deadbeef")), b"stale")
            .await
            .unwrap();

        let cfg = DiskCacheConfig::new(dir.path(), 1024 * 1024);
        let _cache = cfg.build(CountingReader::new(16)).await.unwrap();

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(e) = entries.next_entry().await.unwrap() {
            names.push(e.file_name().to_string_lossy().into_owned());
        }
        assert!(!names.iter().any(|n| n.starts_with(TMP_PREFIX)));
    }

    #[tokio::test]
    async fn eviction_keeps_total_bytes_under_cap() {
        let dir = tempfile::tempdir().unwrap();
        let inner = CountingReader::new(1024 * 1024);
        let cfg = DiskCacheConfig {
            cache_directory: dir.path().to_path_buf(),
            max_bytes: 2048,
            block_size: Some(1024),
            sweep_on_open: false,
        };
        let cache = cfg.build(inner).await.unwrap();

        for i in 0..10u64 {
            cache.read(i * 1024, 10).await.unwrap();
        }

        let stats = cache.stats();
        assert!(stats.total_bytes <= 2048);
        assert!(stats.evictions > 0);
    }
}
