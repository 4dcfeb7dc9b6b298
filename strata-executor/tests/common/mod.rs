//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::time::Duration;
use strata_executor::config::RuntimeConfig;
use strata_executor::observability::LogConfig;
use strata_executor::testing::{MemoryBlockSource, StreamResult, StreamRunner};

/// Blocks per segment in every integration test.
pub const SEGMENT: u64 = 10;

/// Small segments, two workers and fast retries.
pub fn test_config() -> RuntimeConfig {
    RuntimeConfig::default()
        .with_segment_size(SEGMENT)
        .with_parallel_workers(2)
        .with_job_retries(2, Duration::from_millis(5))
        .with_backfiller_delay(2)
}

/// Runner over final blocks `0..head + 1`.
pub fn runner_with_head(head: u64) -> StreamRunner {
    runner(MemoryBlockSource::new().with_final_range(0..head + 1))
}

pub fn runner(source: MemoryBlockSource) -> StreamRunner {
    StreamRunner::builder()
        .with_config(test_config())
        .with_source(source)
        .with_logging(LogConfig::from_env().expect("STRATA_LOG_FORMAT should be json or text"))
        .build()
        .expect("runner should build")
}

/// `(block, count)` pairs expected from `map_count` for `blocks` when the
/// counter starts at `initial_block`.
pub fn expected_counts(blocks: std::ops::Range<u64>, initial_block: u64) -> Vec<(u64, Vec<u8>)> {
    blocks
        .map(|n| (n, (n - initial_block + 1).to_string().into_bytes()))
        .collect()
}

/// Unwrap a successful result, printing the error otherwise.
pub fn assert_success(result: &StreamResult) {
    assert!(result.is_success(), "request failed: {:?}", result.error);
}

/// Sorted `(stage, segment)` jobs recorded since the last clear.
pub fn sorted_jobs(runner: &StreamRunner) -> Vec<(usize, u64)> {
    let mut jobs = runner.client.jobs();
    jobs.sort_unstable();
    jobs
}
