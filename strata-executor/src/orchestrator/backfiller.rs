//! Cache extension behind a live stream.

use crate::config::{RuntimeConfig, DEFAULT_BACKFILLER_DELAY};
use async_trait::async_trait;
use std::sync::Arc;
use strata_core::error::Result;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Produces the artifacts of one whole segment.
#[async_trait]
pub trait SegmentRunner: Send + Sync + 'static {
    async fn run_segment(&self, segment: u64) -> Result<()>;
}

/// Configuration for the live back-filler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackFillerConfig {
    /// Segment size.
    pub segment_size: u64,
    /// Final blocks to wait past a boundary before processing the segment
    /// that ends there.
    pub delay_blocks: u64,
}

impl BackFillerConfig {
    pub fn from_runtime(config: &RuntimeConfig) -> Self {
        Self {
            segment_size: config.segment_size,
            delay_blocks: config.backfiller_delay_blocks,
        }
    }
}

impl Default for BackFillerConfig {
    fn default() -> Self {
        Self {
            segment_size: crate::config::DEFAULT_SEGMENT_SIZE,
            delay_blocks: DEFAULT_BACKFILLER_DELAY,
        }
    }
}

/// Launches one segment job at a time as final blocks go by.
///
/// The current segment starts at the linear handoff. Once a final block lies
/// more than `delay_blocks` past the end of the current segment, that
/// segment is processed; on success the next one becomes current. A failed
/// job stops the back-filler for good.
pub struct LiveBackFiller {
    runner: Arc<dyn SegmentRunner>,
    config: BackFillerConfig,
    current_segment: u64,
    in_flight: Option<JoinHandle<Result<()>>>,
    stopped: bool,
}

impl LiveBackFiller {
    pub fn new(runner: Arc<dyn SegmentRunner>, config: BackFillerConfig, linear_handoff: u64) -> Self {
        Self {
            runner,
            current_segment: linear_handoff / config.segment_size.max(1),
            config,
            in_flight: None,
            stopped: false,
        }
    }

    /// Segment processed next.
    pub fn current_segment(&self) -> u64 {
        self.current_segment
    }

    /// Whether a failure stopped the back-filler.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Whether a job is running.
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Account for the final block `block_num`, launching the job of the
    /// current segment when due.
    pub async fn on_final(&mut self, block_num: u64) {
        self.reap().await;
        if self.stopped || self.in_flight.is_some() {
            return;
        }

        let size = self.config.segment_size.max(1);
        let target = block_num / size;
        if target <= self.current_segment || block_num - target * size <= self.config.delay_blocks {
            return;
        }

        let segment = self.current_segment;
        debug!(segment, block_num, "launching live back-fill");
        let runner = Arc::clone(&self.runner);
        self.in_flight = Some(tokio::spawn(async move { runner.run_segment(segment).await }));
    }

    /// Wait for the running job, if any.
    pub async fn flush(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            self.settle(handle.await);
        }
    }

    /// Abort the running job.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
    }

    async fn reap(&mut self) {
        if self.in_flight.as_ref().is_some_and(|h| h.is_finished()) {
            self.flush().await;
        }
    }

    fn settle(&mut self, outcome: std::result::Result<Result<()>, tokio::task::JoinError>) {
        match outcome {
            Ok(Ok(())) => {
                info!(segment = self.current_segment, "live segment back-filled");
                self.current_segment += 1;
            }
            Ok(Err(err)) => {
                warn!(segment = self.current_segment, error = %err, "live back-fill failed, stopping");
                self.stopped = true;
            }
            Err(err) => {
                warn!(segment = self.current_segment, error = %err, "live back-fill task failed, stopping");
                self.stopped = true;
            }
        }
    }
}

impl Drop for LiveBackFiller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for LiveBackFiller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveBackFiller")
            .field("config", &self.config)
            .field("current_segment", &self.current_segment)
            .field("busy", &self.in_flight.is_some())
            .field("stopped", &self.stopped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use strata_core::error::StrataError;

    #[derive(Default)]
    struct RecordingRunner {
        segments: Mutex<Vec<u64>>,
        fail: bool,
    }

    #[async_trait]
    impl SegmentRunner for RecordingRunner {
        async fn run_segment(&self, segment: u64) -> Result<()> {
            self.segments.lock().push(segment);
            if self.fail {
                return Err(StrataError::ModuleExecution {
                    module: "map_a".into(),
                    block: segment * 10,
                    cause: "boom".into(),
                });
            }
            Ok(())
        }
    }

    fn config() -> BackFillerConfig {
        BackFillerConfig {
            segment_size: 10,
            delay_blocks: 3,
        }
    }

    #[tokio::test]
    async fn waits_for_the_delay_past_the_boundary() {
        let runner = Arc::new(RecordingRunner::default());
        let mut backfiller = LiveBackFiller::new(runner.clone(), config(), 20);
        assert_eq!(backfiller.current_segment(), 2);

        backfiller.on_final(29).await;
        backfiller.on_final(32).await;
        backfiller.on_final(33).await;
        assert!(!backfiller.is_busy());

        backfiller.on_final(34).await;
        assert!(backfiller.is_busy());
        backfiller.flush().await;
        assert_eq!(backfiller.current_segment(), 3);
        assert_eq!(*runner.segments.lock(), vec![2]);
    }

    #[tokio::test]
    async fn one_job_in_flight() {
        let runner = Arc::new(RecordingRunner::default());
        let mut backfiller = LiveBackFiller::new(runner.clone(), config(), 0);
        backfiller.on_final(55).await;
        assert!(backfiller.is_busy());
        backfiller.flush().await;
        backfiller.on_final(56).await;
        backfiller.flush().await;
        assert_eq!(*runner.segments.lock(), vec![0, 1]);
    }

    #[tokio::test]
    async fn failure_stops_the_backfiller() {
        let runner = Arc::new(RecordingRunner {
            fail: true,
            ..RecordingRunner::default()
        });
        let mut backfiller = LiveBackFiller::new(runner.clone(), config(), 0);
        backfiller.on_final(15).await;
        backfiller.flush().await;
        assert!(backfiller.is_stopped());
        backfiller.on_final(45).await;
        assert!(!backfiller.is_busy());
        assert_eq!(*runner.segments.lock(), vec![0]);
    }
}
