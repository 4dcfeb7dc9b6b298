//! Store snapshots and output caches written to a local directory.

use std::sync::Arc;
use strata_core::block::Segmenter;
use strata_core::execout::{ExecOutputBuffer, ExecOutputConfig, ExecOutputWriter, FileWalker};
use strata_core::pb::Clock;
use strata_core::storage::{LocalStore, ObjectStore};
use strata_core::store::{FileInfo, StoreConfig, UpdatePolicy, ValueType};
use strata_core::types::Block;
use tempfile::TempDir;

fn local_base() -> (TempDir, Arc<dyn ObjectStore>) {
    let dir = tempfile::tempdir().unwrap();
    let base: Arc<dyn ObjectStore> = Arc::new(LocalStore::new(dir.path()));
    (dir, base)
}

fn counter_config(base: &Arc<dyn ObjectStore>) -> Arc<StoreConfig> {
    Arc::new(StoreConfig::new(
        "store_count",
        "0f1e2d",
        0,
        UpdatePolicy::Add,
        ValueType::Int64,
        base,
    ))
}

#[tokio::test]
async fn partials_merge_into_the_continuous_state() {
    let (_dir, base) = local_base();
    let config = counter_config(&base);

    let mut continuous = config.new_full_kv();
    for block in 0..30u64 {
        continuous.add_int64(block, "count", 1).unwrap();
        continuous.add_int64(block, format!("parity:{}", block % 2), 1).unwrap();
    }

    let mut first = config.new_full_kv();
    for block in 0..10u64 {
        first.add_int64(block, "count", 1).unwrap();
        first.add_int64(block, format!("parity:{}", block % 2), 1).unwrap();
    }
    let (file, writer) = first.save(10);
    assert_eq!(file, FileInfo::full(0, 10));
    writer.write().await.unwrap();

    for start in [10u64, 20] {
        let mut partial = config.new_partial_kv(start);
        for block in start..start + 10 {
            partial.add_int64(block, "count", 1).unwrap();
            partial.add_int64(block, format!("parity:{}", block % 2), 1).unwrap();
        }
        let (_, writer) = partial.save(start + 10);
        writer.write().await.unwrap();
    }

    let mut merged = config.new_full_kv();
    merged.load(10).await.unwrap();
    for start in [10u64, 20] {
        let mut partial = config.new_partial_kv(start);
        partial.load(&FileInfo::partial(start, start + 10)).await.unwrap();
        merged.merge(&partial).unwrap();
    }
    let (file, writer) = merged.save(30);
    assert_eq!(file, FileInfo::full(0, 30));
    writer.write().await.unwrap();

    let mut reloaded = config.new_full_kv();
    reloaded.load(30).await.unwrap();
    assert_eq!(reloaded.kv(), continuous.kv());
    assert_eq!(reloaded.get_last("count"), Some(&b"30"[..]));

    let files = config.list_snapshot_files().await.unwrap();
    assert!(files.contains(&FileInfo::full(0, 30)));
    assert!(files.contains(&FileInfo::partial(20, 30)));
    assert_eq!(config.existing_full_kv(30).await.unwrap(), Some(FileInfo::full(0, 30)));
}

#[tokio::test]
async fn loading_a_missing_snapshot_fails() {
    let (_dir, base) = local_base();
    let config = counter_config(&base);
    let err = config.new_full_kv().load(100).await.unwrap_err();
    assert_eq!(err.code(), "E501");
}

#[tokio::test]
async fn output_files_are_walked_back_in_order() {
    let (_dir, base) = local_base();
    let config = Arc::new(ExecOutputConfig::new("map_echo", "9a8b", 3, &base));

    let mut writer = ExecOutputWriter::new(&[Arc::clone(&config)], 0, 25, 10);
    for n in 3..25u64 {
        let block = Block::new(Clock::new(n, format!("{n:08x}a"), n as i64), vec![]);
        for file in writer.maybe_rotate(n) {
            file.write().await.unwrap();
        }
        let mut buffer = ExecOutputBuffer::new("test.Block", &block);
        if n % 7 == 0 {
            buffer.set_skipped("map_echo");
        } else {
            buffer.set("map_echo", format!("out-{n}").into_bytes());
        }
        writer.write(&buffer);
    }
    for file in writer.close() {
        file.write().await.unwrap();
    }

    let mut ranges: Vec<(u64, u64)> = config
        .list_existing_files()
        .await
        .unwrap()
        .into_iter()
        .map(|r| (r.start, r.exclusive_end))
        .collect();
    ranges.sort();
    assert_eq!(ranges, vec![(3, 10), (10, 20), (20, 25)]);

    let mut walker = FileWalker::new(Arc::clone(&config), Segmenter::new(10, 3, 25));
    let mut seen = Vec::new();
    while let Some(file) = walker.next().await.unwrap() {
        for item in file.sorted_items() {
            seen.push((item.block_num, item.is_skipped));
        }
    }
    assert_eq!(seen.len(), 22);
    assert_eq!(seen.first(), Some(&(3, false)));
    assert_eq!(seen.iter().filter(|(_, skipped)| *skipped).count(), 3);
    assert!(seen.windows(2).all(|w| w[0].0 < w[1].0));
}
