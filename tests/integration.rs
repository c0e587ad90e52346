//! End-to-end tests exercising composed decorator stacks against a real
//! file-backed resource, per the scenarios in spec §8.

use std::io::Write;
use std::sync::Arc;

use rangereader::provider::{Configuration, ProviderRegistry};
use rangereader::{BlockAlignedReader, DiskCacheConfig, FileRangeReader, MemoryCacheConfig, RangeReader};

fn sample_file(size: usize) -> tempfile::NamedTempFile {
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    let data: Vec<u8> = (0..size).map(|i| (i % 256) as u8).collect();
    tmp.write_all(&data).unwrap();
    tmp
}

#[tokio::test]
async fn scenario_1_file_basic_read() {
    let tmp = sample_file(1024);
    let reader = FileRangeReader::new(tmp.path());
    let buf = reader.read(100, 16).await.unwrap();
    let expected: Vec<u8> = (100..116).map(|i| (i % 256) as u8).collect();
    assert_eq!(buf.written(), expected.as_slice());
}

#[tokio::test]
async fn scenario_2_file_eof_clamp() {
    let tmp = sample_file(1024);
    let reader = FileRangeReader::new(tmp.path());

    let tail = reader.read(1020, 100).await.unwrap();
    let expected: Vec<u8> = (1020..1024).map(|i| (i % 256) as u8).collect();
    assert_eq!(tail.written(), expected.as_slice());

    let past_eof = reader.read(2000, 10).await.unwrap();
    assert_eq!(past_eof.written().len(), 0);
}

#[tokio::test]
async fn canonical_stack_reads_identical_bytes_with_or_without_decorators() {
    // I2/P3: the same range read through a bare reader and through the full
    // canonical stack (BlockAligned -> MemoryCache -> BlockAligned ->
    // DiskCache -> backend, per §9) returns byte-identical data.
    let tmp = sample_file(256 * 1024);
    let dir = tempfile::tempdir().unwrap();

    let plain = FileRangeReader::new(tmp.path());
    let plain_bytes = plain.read(12_345, 777).await.unwrap();

    let disk_cached = DiskCacheConfig {
        cache_directory: dir.path().to_path_buf(),
        max_bytes: 16 * 1024 * 1024,
        block_size: Some(1024 * 1024),
        sweep_on_open: false,
    }
    .build(FileRangeReader::new(tmp.path()))
    .await
    .unwrap();

    let memory_cached = MemoryCacheConfig {
        block_aligned: Some(64 * 1024),
        ..Default::default()
    }
    .build(disk_cached)
    .unwrap();

    let outer_aligned = BlockAlignedReader::new(memory_cached, 4096).unwrap();

    let stacked_bytes = outer_aligned.read(12_345, 777).await.unwrap();
    assert_eq!(plain_bytes.written(), stacked_bytes.written());
}

#[tokio::test]
async fn disk_cache_survives_reopen_while_memory_cache_does_not() {
    // P5 composed with the memory cache sitting in front: a fresh process
    // (new MemoryCacheReader, same disk cache directory) still hits disk
    // rather than the backend.
    let tmp = sample_file(64 * 1024);
    let dir = tempfile::tempdir().unwrap();

    {
        let disk = DiskCacheConfig::new(dir.path(), 4 * 1024 * 1024)
            .build(FileRangeReader::new(tmp.path()))
            .await
            .unwrap();
        let memory = MemoryCacheConfig::default().build(disk).unwrap();
        memory.read(0, 4096).await.unwrap();
    }

    let disk = DiskCacheConfig::new(dir.path(), 4 * 1024 * 1024)
        .build(FileRangeReader::new(tmp.path()))
        .await
        .unwrap();
    assert_eq!(disk.stats().entries, 1);
    let buf = disk.read(0, 4096).await.unwrap();
    assert_eq!(buf.written().len(), 4096);
    assert_eq!(disk.stats().hits, 1);
    assert_eq!(disk.stats().misses, 0);
}

#[tokio::test]
async fn provider_registry_resolves_a_file_uri_end_to_end() {
    let tmp = sample_file(4096);
    let uri = url::Url::from_file_path(tmp.path()).unwrap();

    let registry = ProviderRegistry::with_builtins();
    let config = Configuration::new(uri);
    let reader = registry.resolve(&config).await.unwrap();

    let buf = reader.read(0, 100).await.unwrap();
    let expected: Vec<u8> = (0..100).map(|i| (i % 256) as u8).collect();
    assert_eq!(buf.written(), expected.as_slice());
    // caching is on by default, so the resolved reader is memory-cached.
    assert!(reader.identity().contains("memory-cached"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn eight_concurrent_callers_through_the_full_stack_coalesce_to_one_fetch() {
    // P4 exercised through the canonical stack rather than a bare
    // MemoryCacheReader: the disk cache and inner block-aligner sit between
    // the memory cache and the backend, but the fetch count the backend
    // file sees is still governed by the memory cache's single flight.
    let tmp = sample_file(256 * 1024);
    let dir = tempfile::tempdir().unwrap();

    let disk_cached = DiskCacheConfig {
        cache_directory: dir.path().to_path_buf(),
        max_bytes: 16 * 1024 * 1024,
        block_size: Some(64 * 1024),
        sweep_on_open: false,
    }
    .build(FileRangeReader::new(tmp.path()))
    .await
    .unwrap();

    let memory_cached = Arc::new(MemoryCacheConfig::default().build(disk_cached).unwrap());
    let barrier = Arc::new(std::sync::Barrier::new(8));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let reader = memory_cached.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait();
            reader.read(1000, 2048).await.unwrap()
        }));
    }

    let mut results = Vec::new();
    for h in handles {
        results.push(h.await.unwrap());
    }
    for r in &results[1..] {
        assert_eq!(r.written(), results[0].written());
    }

    let stats = memory_cached.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 7);
}
