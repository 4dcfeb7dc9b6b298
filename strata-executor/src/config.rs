//! Runtime configuration for the executor.
//!
//! Every knob has a default; [`RuntimeConfig::from_env`] overrides them from
//! `STRATA_*` environment variables.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use strata_core::error::{Result, StrataError};
use crate::wasm::DEFAULT_FUEL;
use strata_core::store::StoreLimits;

/// Default number of blocks per segment.
pub const DEFAULT_SEGMENT_SIZE: u64 = 1000;

/// Default number of blocks a final block must be past a segment start
/// before the live back-filler schedules that segment.
pub const DEFAULT_BACKFILLER_DELAY: u64 = 120;

/// Executor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Blocks per segment.
    pub segment_size: u64,
    /// Concurrent Tier-2 jobs per request.
    pub parallel_workers: usize,
    /// Attempts per Tier-2 job before it is reported as failed.
    pub max_job_attempts: u32,
    /// Delay before the first job retry, doubled on every attempt.
    pub job_retry_delay_ms: u64,
    /// Upper bound of the job retry delay.
    pub job_retry_max_delay_ms: u64,
    /// Limits applied to every store.
    pub store_limits: StoreLimits,
    /// See [`DEFAULT_BACKFILLER_DELAY`].
    pub backfiller_delay_blocks: u64,
    /// Failures of one request fingerprint that trigger short-circuiting.
    pub failure_threshold: u32,
    /// Window over which failures are counted.
    pub failure_window_secs: u64,
    /// Fuel granted to every WASM call.
    pub wasm_fuel: u64,
    /// Maximum guest memory in 64 KiB pages.
    pub wasm_max_memory_pages: u32,
    /// Responses buffered between the pipeline and a slow client.
    pub response_buffer: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            segment_size: DEFAULT_SEGMENT_SIZE,
            parallel_workers: 4,
            max_job_attempts: 3,
            job_retry_delay_ms: 500,
            job_retry_max_delay_ms: 30_000,
            store_limits: StoreLimits::default(),
            backfiller_delay_blocks: DEFAULT_BACKFILLER_DELAY,
            failure_threshold: 3,
            failure_window_secs: 600,
            wasm_fuel: DEFAULT_FUEL,
            wasm_max_memory_pages: 1024,
            response_buffer: 100,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by environment variables.
    ///
    /// Environment variables:
    /// - `STRATA_SEGMENT_SIZE`
    /// - `STRATA_PARALLEL_WORKERS`
    /// - `STRATA_MAX_JOB_ATTEMPTS`
    /// - `STRATA_JOB_RETRY_DELAY_MS`
    /// - `STRATA_ITEM_SIZE_LIMIT`, `STRATA_APPEND_LIMIT`, `STRATA_TOTAL_SIZE_LIMIT`
    /// - `STRATA_BACKFILLER_DELAY`
    /// - `STRATA_FAILURE_THRESHOLD`, `STRATA_FAILURE_WINDOW_SECS`
    /// - `STRATA_WASM_FUEL`, `STRATA_WASM_MAX_MEMORY_PAGES`
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        override_from_env("STRATA_SEGMENT_SIZE", &mut config.segment_size)?;
        override_from_env("STRATA_PARALLEL_WORKERS", &mut config.parallel_workers)?;
        override_from_env("STRATA_MAX_JOB_ATTEMPTS", &mut config.max_job_attempts)?;
        override_from_env("STRATA_JOB_RETRY_DELAY_MS", &mut config.job_retry_delay_ms)?;
        override_from_env(
            "STRATA_ITEM_SIZE_LIMIT",
            &mut config.store_limits.item_size_limit,
        )?;
        override_from_env("STRATA_APPEND_LIMIT", &mut config.store_limits.append_limit)?;
        override_from_env(
            "STRATA_TOTAL_SIZE_LIMIT",
            &mut config.store_limits.total_size_limit,
        )?;
        override_from_env(
            "STRATA_BACKFILLER_DELAY",
            &mut config.backfiller_delay_blocks,
        )?;
        override_from_env("STRATA_FAILURE_THRESHOLD", &mut config.failure_threshold)?;
        override_from_env(
            "STRATA_FAILURE_WINDOW_SECS",
            &mut config.failure_window_secs,
        )?;
        override_from_env("STRATA_WASM_FUEL", &mut config.wasm_fuel)?;
        override_from_env(
            "STRATA_WASM_MAX_MEMORY_PAGES",
            &mut config.wasm_max_memory_pages,
        )?;
        config.validate()?;
        Ok(config)
    }

    /// Set the segment size.
    pub fn with_segment_size(mut self, size: u64) -> Self {
        self.segment_size = size;
        self
    }

    /// Set the number of concurrent Tier-2 jobs.
    pub fn with_parallel_workers(mut self, workers: usize) -> Self {
        self.parallel_workers = workers;
        self
    }

    /// Set the job retry policy.
    pub fn with_job_retries(mut self, attempts: u32, delay: Duration) -> Self {
        self.max_job_attempts = attempts;
        self.job_retry_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the store limits.
    pub fn with_store_limits(mut self, limits: StoreLimits) -> Self {
        self.store_limits = limits;
        self
    }

    /// Set the back-filler delay.
    pub fn with_backfiller_delay(mut self, blocks: u64) -> Self {
        self.backfiller_delay_blocks = blocks;
        self
    }

    /// Set the failure recorder threshold and window.
    pub fn with_failure_threshold(mut self, threshold: u32, window: Duration) -> Self {
        self.failure_threshold = threshold;
        self.failure_window_secs = window.as_secs();
        self
    }

    /// Set the fuel granted to every WASM call.
    pub fn with_wasm_fuel(mut self, fuel: u64) -> Self {
        self.wasm_fuel = fuel;
        self
    }

    /// Delay before the first job retry.
    pub fn job_retry_delay(&self) -> Duration {
        Duration::from_millis(self.job_retry_delay_ms)
    }

    /// Upper bound of the job retry delay.
    pub fn job_retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.job_retry_max_delay_ms)
    }

    /// Window over which request failures are counted.
    pub fn failure_window(&self) -> Duration {
        Duration::from_secs(self.failure_window_secs)
    }

    /// Reject values the executor cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.segment_size == 0 {
            return Err(invalid("segment_size", "must be greater than 0"));
        }
        if self.parallel_workers == 0 {
            return Err(invalid("parallel_workers", "must be greater than 0"));
        }
        if self.max_job_attempts == 0 {
            return Err(invalid("max_job_attempts", "must be greater than 0"));
        }
        if self.failure_threshold == 0 {
            return Err(invalid("failure_threshold", "must be greater than 0"));
        }
        if self.wasm_fuel == 0 {
            return Err(invalid("wasm_fuel", "must be greater than 0"));
        }
        if self.response_buffer == 0 {
            return Err(invalid("response_buffer", "must be greater than 0"));
        }
        if self.store_limits.append_limit == 0 || self.store_limits.item_size_limit == 0 {
            return Err(invalid("store_limits", "limits must be greater than 0"));
        }
        Ok(())
    }
}

fn override_from_env<T>(name: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Ok(raw) = env::var(name) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(name, &e.to_string()))?;
    }
    Ok(())
}

fn invalid(field: &str, cause: &str) -> StrataError {
    StrataError::ConfigValue {
        field: field.to_string(),
        cause: cause.to_string(),
    }
}
