//! Integration tests for the on-disk bootstrap store.

use alopex_skulk_bootstrap::sink::file::STATUS_LOG_FILE;
use alopex_skulk_bootstrap::{
    BlockStatus, BlockStore, BlockWindow, BootstrapError, BootstrapSink, Datapoint, FileStore,
    NamespaceId, ReconciledBlock, Series, SeriesId,
};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const HOUR: i64 = 3_600_000_000_000;

/// Helper function to generate a block of `series` series with `count`
/// points each at 1s intervals.
fn generate_block(shard: u32, start_ts: i64, series: usize, count: usize) -> ReconciledBlock {
    let window = BlockWindow::new(start_ts, Duration::from_secs(7200));
    let series = (0..series).map(|s| {
        let points = (0..count)
            .map(|i| {
                let value = 50.0 + (i as f64) * 0.1 + ((i as f64) * 0.1).sin() * 5.0;
                let point = Datapoint::new(start_ts + (i as i64) * 1_000_000_000, value);
                if i % 100 == 0 {
                    point.with_annotation(format!("deploy-{i}").into_bytes())
                } else {
                    point
                }
            })
            .collect();
        Series::from_points(format!("cpu.usage+host=server{s}"), points)
    });
    ReconciledBlock::from_series(shard, window, series)
}

#[test]
fn test_large_block_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let ns = NamespaceId::new("metrics");
    let block = generate_block(7, 2 * HOUR, 50, 7200);

    {
        let store = Arc::new(FileStore::open(temp_dir.path()).unwrap());
        let sink = BootstrapSink::new(store, ns.clone());
        sink.persist(&block, BlockStatus::Fulfilled).unwrap();
    }

    let store = FileStore::open(temp_dir.path()).unwrap();
    let stored = store.read_block(&ns, 7, 2 * HOUR).unwrap().unwrap();
    assert_eq!(stored.point_count(), 50 * 7200);
    assert_eq!(&stored.series, block.series());

    let series = &stored.series[&SeriesId::new("cpu.usage+host=server3")];
    assert_eq!(series.points()[100].annotation.as_deref(), Some(&b"deploy-100"[..]));
    assert_eq!(series.points()[101].annotation, None);
}

#[test]
fn test_corrupted_block_file_detection() {
    let temp_dir = TempDir::new().unwrap();
    let ns = NamespaceId::new("metrics");
    let store = FileStore::open(temp_dir.path()).unwrap();
    store.write_block(&ns, &generate_block(1, 0, 4, 100)).unwrap();

    // Corrupt the data section (somewhere in the middle)
    let path = store.block_path(&ns, 1, 0);
    let mut contents = fs::read(&path).unwrap();
    let corrupt_offset = contents.len() / 2;
    contents[corrupt_offset] ^= 0xFF;
    contents[corrupt_offset + 1] ^= 0xAA;
    fs::write(&path, &contents).unwrap();

    let result = store.read_block(&ns, 1, 0);
    assert!(matches!(result, Err(BootstrapError::ChecksumMismatch { .. })));
}

#[test]
fn test_crash_between_write_and_mark() {
    let temp_dir = TempDir::new().unwrap();
    let ns = NamespaceId::new("metrics");

    // Block file written, then the process dies before the status append.
    // A stray temp file from an interrupted earlier write is also left.
    {
        let store = FileStore::open(temp_dir.path()).unwrap();
        store.write_block(&ns, &generate_block(2, 0, 1, 10)).unwrap();
        let stray = store.block_path(&ns, 2, 2 * HOUR).with_extension("blk.tmp");
        fs::write(stray, b"half written").unwrap();
    }

    let store = Arc::new(FileStore::open(temp_dir.path()).unwrap());
    let status = store.load_status(&ns, 2).unwrap();
    assert_eq!(status.get(0), BlockStatus::Unfulfilled);
    assert!(store.read_block(&ns, 2, 2 * HOUR).unwrap().is_none());

    // The unit is retried and the rewrite is marked normally.
    let sink = BootstrapSink::new(Arc::clone(&store), ns.clone());
    let rewrite = generate_block(2, 0, 1, 20);
    sink.persist(&rewrite, BlockStatus::Degraded).unwrap();
    assert_eq!(store.load_status(&ns, 2).unwrap().get(0), BlockStatus::Degraded);
    assert_eq!(store.read_block(&ns, 2, 0).unwrap().unwrap().point_count(), 20);
}

#[test]
fn test_torn_status_log_survives_multiple_reopens() {
    let temp_dir = TempDir::new().unwrap();
    let ns = NamespaceId::new("metrics");

    {
        let store = Arc::new(FileStore::open(temp_dir.path()).unwrap());
        let sink = BootstrapSink::new(store, ns.clone());
        let first = generate_block(0, 0, 1, 10);
        let second = generate_block(0, 2 * HOUR, 1, 10);
        sink.persist(&first, BlockStatus::Fulfilled).unwrap();
        sink.persist(&second, BlockStatus::Degraded).unwrap();
    }

    // Simulate a crash in the middle of a status append.
    {
        let log_path = temp_dir.path().join("metrics").join(STATUS_LOG_FILE);
        let mut file = OpenOptions::new().append(true).open(log_path).unwrap();
        file.write_all(&[13, 0, 0, 0, 0xDE, 0xAD]).unwrap();
    }

    for round in 0..3i64 {
        let store = Arc::new(FileStore::open(temp_dir.path()).unwrap());
        let status = store.load_status(&ns, 0).unwrap();
        assert_eq!(status.get(0), BlockStatus::Fulfilled);
        assert_eq!(status.get(2 * HOUR), BlockStatus::Degraded);
        assert_eq!(status.len(), 2 + round as usize);

        let sink = BootstrapSink::new(store, ns.clone());
        let start = (4 + 2 * round) * HOUR;
        let block = generate_block(0, start, 1, 5);
        sink.persist(&block, BlockStatus::Fulfilled).unwrap();
    }

    let store = FileStore::open(temp_dir.path()).unwrap();
    let status = store.load_status(&ns, 0).unwrap();
    assert_eq!(status.len(), 5);
    assert_eq!(status.get(2 * HOUR), BlockStatus::Degraded);
    assert_eq!(status.blocks_with(BlockStatus::Fulfilled).len(), 4);
}

#[test]
fn test_namespaces_and_shards_are_isolated() {
    let temp_dir = TempDir::new().unwrap();
    let metrics = NamespaceId::new("metrics");
    let traces = NamespaceId::new("traces");
    let store = Arc::new(FileStore::open(temp_dir.path()).unwrap());

    BootstrapSink::new(Arc::clone(&store), metrics.clone())
        .persist(&generate_block(1, 0, 2, 10), BlockStatus::Fulfilled)
        .unwrap();
    BootstrapSink::new(Arc::clone(&store), traces.clone())
        .persist(&generate_block(2, 0, 3, 10), BlockStatus::Degraded)
        .unwrap();

    assert_eq!(store.load_status(&metrics, 1).unwrap().get(0), BlockStatus::Fulfilled);
    assert!(store.load_status(&metrics, 2).unwrap().is_empty());
    assert!(store.load_status(&traces, 1).unwrap().is_empty());
    assert_eq!(store.load_status(&traces, 2).unwrap().get(0), BlockStatus::Degraded);
    assert!(store.read_block(&traces, 1, 0).unwrap().is_none());
    assert_eq!(store.read_block(&traces, 2, 0).unwrap().unwrap().series.len(), 3);
}
