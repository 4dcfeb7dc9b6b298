//! Folding partial store snapshots into full ones.
//!
//! Segment jobs leave one partial snapshot per store and segment. Before a
//! later stage can read a store at a boundary, the partials are merged in
//! segment order onto the latest full snapshot, saving a full snapshot at
//! every step.

use std::sync::Arc;
use strata_core::block::{is_boundary, next_boundary, BlockRange, Segmenter};
use strata_core::error::{Result, StrataError};
use strata_core::store::{FileInfo, StoreConfig};
use tracing::{debug, info, instrument};

/// Snapshot files of one store, as listed in storage.
#[derive(Debug, Clone)]
pub struct StoreFiles {
    config: Arc<StoreConfig>,
    files: Vec<FileInfo>,
}

impl StoreFiles {
    /// List the snapshot files of `config`.
    pub async fn scan(config: Arc<StoreConfig>) -> Result<Self> {
        let files = config.list_snapshot_files().await?;
        Ok(Self { config, files })
    }

    /// The store these files belong to.
    pub fn config(&self) -> &Arc<StoreConfig> {
        &self.config
    }

    /// End of the most advanced full snapshot usable as a base for `end`:
    /// one ending at `end` or at a boundary before it.
    pub fn full_end(&self, end: u64, interval: u64) -> Option<u64> {
        let initial = self.config.initial_block();
        self.files
            .iter()
            .filter(|f| !f.partial && f.range.start == initial)
            .map(|f| f.range.exclusive_end)
            .filter(|&e| e == end || (e < end && is_boundary(e, interval)))
            .max()
    }

    /// The partial snapshot covering exactly `range`.
    pub fn partial(&self, range: BlockRange) -> Option<&FileInfo> {
        self.files.iter().find(|f| f.partial && f.range == range)
    }

    /// Whether the segment `range` was already produced, as a partial or as
    /// a full snapshot ending with it.
    pub fn covers(&self, range: BlockRange) -> bool {
        let initial = self.config.initial_block();
        self.files.iter().any(|f| {
            (f.partial && f.range == range)
                || (!f.partial && f.range.start == initial && f.range.exclusive_end == range.exclusive_end)
        })
    }

    /// Segments still to produce so that a full snapshot ending at `end`
    /// can be squashed.
    pub fn missing_segments(&self, interval: u64, end: u64) -> Vec<(u64, BlockRange)> {
        let initial = self.config.initial_block();
        if end <= initial {
            return Vec::new();
        }
        let from = self.full_end(end, interval).unwrap_or(initial);
        Segmenter::new(interval, from, end)
            .segments()
            .filter(|(_, range)| !self.covers(*range))
            .collect()
    }
}

/// Merge the partials of `files` into a full snapshot ending at `end`.
///
/// Returns the last full snapshot written, or `None` when one ending at
/// `end` already existed. A missing partial between the latest full
/// snapshot and `end` is an error: merges never skip a segment.
#[instrument(skip(files), fields(store = %files.config().name()))]
pub async fn squash(files: &StoreFiles, interval: u64, end: u64) -> Result<Option<FileInfo>> {
    let config = files.config();
    let initial = config.initial_block();
    if end <= initial {
        return Ok(None);
    }

    let mut current = files.full_end(end, interval).unwrap_or(initial);
    if current >= end {
        debug!(end, "full snapshot already present");
        return Ok(None);
    }

    let mut full = config.new_full_kv();
    if current > initial {
        full.load(current).await?;
    }

    let mut written = None;
    while current < end {
        let segment_end = next_boundary(current, interval).min(end);
        let range = BlockRange::new(current, segment_end);
        let file = files.partial(range).ok_or_else(|| StrataError::StoreMerge {
            module: config.name().to_string(),
            cause: format!("missing partial snapshot for {range}"),
        })?;

        let mut partial = config.new_partial_kv(current);
        partial.load(file).await?;
        full.merge(&partial)?;

        let (info, writer) = full.save(segment_end);
        writer.write().await?;
        debug!(file = %info, "squashed partial");
        written = Some(info);
        current = segment_end;
    }

    info!(end, keys = full.len(), "store squashed");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::storage::{MemoryStore, ObjectStore};
    use strata_core::store::{UpdatePolicy, ValueType};

    fn config(initial: u64) -> Arc<StoreConfig> {
        let base: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        Arc::new(StoreConfig::new(
            "store_sum",
            "h",
            initial,
            UpdatePolicy::Add,
            ValueType::Int64,
            &base,
        ))
    }

    async fn write_full(config: &Arc<StoreConfig>, end: u64, value: i64) {
        let mut full = config.new_full_kv();
        full.add_int64(1, "k", value).unwrap();
        full.save(end).1.write().await.unwrap();
    }

    async fn write_partial(config: &Arc<StoreConfig>, start: u64, end: u64, value: i64) {
        let mut partial = config.new_partial_kv(start);
        partial.add_int64(1, "k", value).unwrap();
        partial.save(end).1.write().await.unwrap();
    }

    #[tokio::test]
    async fn merges_partials_in_order() {
        let config = config(5);
        write_full(&config, 10, 1).await;
        write_partial(&config, 10, 20, 2).await;
        write_partial(&config, 20, 30, 3).await;

        let files = StoreFiles::scan(Arc::clone(&config)).await.unwrap();
        assert!(files.missing_segments(10, 30).is_empty());
        let info = squash(&files, 10, 30).await.unwrap().unwrap();
        assert_eq!(info, FileInfo::full(5, 30));

        let mut full = config.new_full_kv();
        full.load(30).await.unwrap();
        assert_eq!(full.get_last("k"), Some(&b"6"[..]));
        // intermediate snapshots were saved too
        assert!(config.existing_full_kv(20).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn gap_is_an_error() {
        let config = config(0);
        write_full(&config, 10, 1).await;
        write_partial(&config, 20, 30, 3).await;

        let files = StoreFiles::scan(Arc::clone(&config)).await.unwrap();
        let missing: Vec<u64> = files.missing_segments(10, 30).into_iter().map(|(n, _)| n).collect();
        assert_eq!(missing, vec![1]);
        let err = squash(&files, 10, 30).await.unwrap_err();
        assert_eq!(err.code(), "E401");
    }

    #[tokio::test]
    async fn existing_full_is_reused() {
        let config = config(0);
        write_full(&config, 30, 1).await;
        let files = StoreFiles::scan(Arc::clone(&config)).await.unwrap();
        assert!(squash(&files, 10, 30).await.unwrap().is_none());
        assert_eq!(files.full_end(40, 10), Some(30));
        assert_eq!(
            files.missing_segments(10, 40),
            vec![(3, BlockRange::new(30, 40))]
        );
    }

    #[tokio::test]
    async fn unaligned_full_is_not_a_base() {
        let config = config(0);
        write_full(&config, 42, 1).await;
        let files = StoreFiles::scan(Arc::clone(&config)).await.unwrap();
        assert_eq!(files.full_end(42, 10), Some(42));
        assert_eq!(files.full_end(50, 10), None);
    }
}
