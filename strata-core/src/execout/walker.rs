use super::config::ExecOutputConfig;
use super::file::ExecOutputFile;
use crate::block::Segmenter;
use crate::error::{Result, StrataError};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

type Preload = JoinHandle<Result<ExecOutputFile>>;

/// Walks the output files of one module segment by segment.
///
/// The file after the one handed out is loaded in the background; files are
/// owned by the caller once returned, so nothing behind the cursor is kept.
/// Missing files come back empty: files with no output are never written.
pub struct FileWalker {
    config: Arc<ExecOutputConfig>,
    segmenter: Segmenter,
    next_index: u64,
    last_index: Option<u64>,
    preloaded: Option<(u64, Preload)>,
}

impl FileWalker {
    /// Walk every segment of `segmenter`.
    pub fn new(config: Arc<ExecOutputConfig>, segmenter: Segmenter) -> Self {
        Self {
            next_index: segmenter.first_index(),
            last_index: segmenter.last_index(),
            config,
            segmenter,
            preloaded: None,
        }
    }

    /// Whether every segment was handed out.
    pub fn is_done(&self) -> bool {
        self.last_index.map_or(true, |last| self.next_index > last)
    }

    /// The next loaded file, `None` after the last segment.
    pub async fn next(&mut self) -> Result<Option<ExecOutputFile>> {
        if self.is_done() {
            return Ok(None);
        }
        let index = self.next_index;
        let file = match self.preloaded.take() {
            Some((preloaded_index, handle)) if preloaded_index == index => {
                handle.await.map_err(|e| StrataError::Internal {
                    cause: format!("output preload task failed: {e}"),
                })??
            }
            _ => self.spawn(index).await.map_err(|e| StrataError::Internal {
                cause: format!("output load task failed: {e}"),
            })??,
        };
        self.next_index += 1;

        if !self.is_done() {
            self.preloaded = Some((self.next_index, self.spawn(self.next_index)));
        }
        Ok(Some(file))
    }

    fn spawn(&self, index: u64) -> Preload {
        let range = self.segmenter.range(index);
        let config = Arc::clone(&self.config);
        let interval = self.segmenter.interval();
        let upper = self.segmenter.exclusive_end_block();
        tokio::spawn(async move {
            let range = range.ok_or_else(|| StrataError::Internal {
                cause: format!("segment {index} is outside the walked range"),
            })?;
            let mut file = config.new_file(range, interval, upper);
            let loaded = file.load().await?;
            debug!(module = %config.module_name(), range = %range, loaded, "walked output file");
            Ok(file)
        })
    }
}

impl Drop for FileWalker {
    fn drop(&mut self) {
        if let Some((_, handle)) = self.preloaded.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockRange;
    use crate::pb::Clock;
    use crate::storage::{MemoryStore, ObjectStore};

    #[tokio::test]
    async fn walks_segments_in_order() {
        let base: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        let config = Arc::new(ExecOutputConfig::new("m1", "h1", 5, &base));

        for (start, end) in [(5, 10), (20, 25)] {
            let mut file = config.new_file(BlockRange::new(start, end), 10, 25);
            file.set(&Clock::new(start, format!("b{start}"), 0), b"x", false);
            file.save().unwrap().write().await.unwrap();
        }

        let mut walker = FileWalker::new(Arc::clone(&config), Segmenter::new(10, 5, 25));
        let mut seen = Vec::new();
        while let Some(file) = walker.next().await.unwrap() {
            seen.push((file.range(), file.len()));
        }
        assert_eq!(
            seen,
            vec![
                (BlockRange::new(5, 10), 1),
                (BlockRange::new(10, 20), 0),
                (BlockRange::new(20, 25), 1),
            ]
        );
        assert!(walker.is_done());
        assert!(walker.next().await.unwrap().is_none());
    }
}
