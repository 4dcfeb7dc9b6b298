//! Prometheus metrics for strata.
//!
//! One [`Metrics`] instance is created at startup and handed to the services
//! that record into it.
//!
//! # Metrics
//!
//! ## Counters
//! - `strata_blocks_processed_total` - Blocks run through a pipeline, by tier
//! - `strata_module_executions_total` - Module runs by module and outcome
//!   (`executed`, `cached`, `skipped`)
//! - `strata_jobs_started_total` / `strata_jobs_completed_total` /
//!   `strata_jobs_failed_total` - Tier-2 jobs by stage
//! - `strata_storage_bytes_read_total` / `strata_storage_bytes_written_total`
//!
//! ## Gauges
//! - `strata_running_jobs` - Tier-2 jobs in flight
//! - `strata_active_requests` - Requests being served, by tier
//!
//! ## Histograms
//! - `strata_block_duration_seconds` - Time to process one block, by tier
//! - `strata_job_duration_seconds` - Time to run one Tier-2 job

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};

/// Buckets for per-block durations (in seconds).
const BLOCK_DURATION_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0,
];

/// Buckets for job durations (in seconds).
const JOB_DURATION_BUCKETS: &[f64] = &[
    0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0,
];

/// Strata metrics registry.
pub struct Metrics {
    registry: Registry,

    /// Blocks processed by tier.
    pub blocks_processed: IntCounterVec,
    /// Module runs by module and outcome.
    pub module_executions: IntCounterVec,
    /// Jobs started by stage.
    pub jobs_started: IntCounterVec,
    /// Jobs completed by stage.
    pub jobs_completed: IntCounterVec,
    /// Jobs failed by stage.
    pub jobs_failed: IntCounterVec,
    /// Bytes read from object storage.
    pub bytes_read: IntCounter,
    /// Bytes written to object storage.
    pub bytes_written: IntCounter,

    /// Jobs in flight.
    pub running_jobs: IntGauge,
    /// Requests being served, by tier.
    pub active_requests: IntGaugeVec,

    /// Block duration by tier.
    pub block_duration: HistogramVec,
    /// Job duration by stage.
    pub job_duration: HistogramVec,
}

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help)
        .namespace("strata")
        .const_label("service", "executor")
}

fn histogram_opts(name: &str, help: &str, buckets: &[f64]) -> HistogramOpts {
    HistogramOpts::new(name, help)
        .namespace("strata")
        .const_label("service", "executor")
        .buckets(buckets.to_vec())
}

impl Metrics {
    /// Create a new registry with every strata metric.
    pub fn new() -> Self {
        let registry = Registry::new();

        let blocks_processed = IntCounterVec::new(
            opts("blocks_processed_total", "Blocks run through a pipeline"),
            &["tier"],
        )
        .expect("metric creation should not fail");

        let module_executions = IntCounterVec::new(
            opts("module_executions_total", "Module runs by outcome"),
            &["module", "outcome"],
        )
        .expect("metric creation should not fail");

        let jobs_started = IntCounterVec::new(
            opts("jobs_started_total", "Tier-2 jobs started"),
            &["stage"],
        )
        .expect("metric creation should not fail");

        let jobs_completed = IntCounterVec::new(
            opts("jobs_completed_total", "Tier-2 jobs completed"),
            &["stage"],
        )
        .expect("metric creation should not fail");

        let jobs_failed = IntCounterVec::new(
            opts("jobs_failed_total", "Tier-2 jobs failed after every attempt"),
            &["stage"],
        )
        .expect("metric creation should not fail");

        let bytes_read = IntCounter::with_opts(opts(
            "storage_bytes_read_total",
            "Bytes read from object storage",
        ))
        .expect("metric creation should not fail");

        let bytes_written = IntCounter::with_opts(opts(
            "storage_bytes_written_total",
            "Bytes written to object storage",
        ))
        .expect("metric creation should not fail");

        let running_jobs = IntGauge::with_opts(opts("running_jobs", "Tier-2 jobs in flight"))
            .expect("metric creation should not fail");

        let active_requests = IntGaugeVec::new(
            opts("active_requests", "Requests being served"),
            &["tier"],
        )
        .expect("metric creation should not fail");

        let block_duration = HistogramVec::new(
            histogram_opts(
                "block_duration_seconds",
                "Time to process one block in seconds",
                BLOCK_DURATION_BUCKETS,
            ),
            &["tier"],
        )
        .expect("metric creation should not fail");

        let job_duration = HistogramVec::new(
            histogram_opts(
                "job_duration_seconds",
                "Time to run one Tier-2 job in seconds",
                JOB_DURATION_BUCKETS,
            ),
            &["stage"],
        )
        .expect("metric creation should not fail");

        registry
            .register(Box::new(blocks_processed.clone()))
            .expect("registration should not fail");
        registry
            .register(Box::new(module_executions.clone()))
            .expect("registration should not fail");
        registry
            .register(Box::new(jobs_started.clone()))
            .expect("registration should not fail");
        registry
            .register(Box::new(jobs_completed.clone()))
            .expect("registration should not fail");
        registry
            .register(Box::new(jobs_failed.clone()))
            .expect("registration should not fail");
        registry
            .register(Box::new(bytes_read.clone()))
            .expect("registration should not fail");
        registry
            .register(Box::new(bytes_written.clone()))
            .expect("registration should not fail");
        registry
            .register(Box::new(running_jobs.clone()))
            .expect("registration should not fail");
        registry
            .register(Box::new(active_requests.clone()))
            .expect("registration should not fail");
        registry
            .register(Box::new(block_duration.clone()))
            .expect("registration should not fail");
        registry
            .register(Box::new(job_duration.clone()))
            .expect("registration should not fail");

        Self {
            registry,
            blocks_processed,
            module_executions,
            jobs_started,
            jobs_completed,
            jobs_failed,
            bytes_read,
            bytes_written,
            running_jobs,
            active_requests,
            block_duration,
            job_duration,
        }
    }

    /// Get the Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a processed block.
    pub fn record_block(&self, tier: &str, duration_secs: f64) {
        self.blocks_processed.with_label_values(&[tier]).inc();
        self.block_duration
            .with_label_values(&[tier])
            .observe(duration_secs);
    }

    /// Record one module run with `outcome` one of `executed`, `cached` or
    /// `skipped`.
    pub fn record_module(&self, module: &str, outcome: &str) {
        self.module_executions
            .with_label_values(&[module, outcome])
            .inc();
    }

    /// Record the start of a job.
    pub fn record_job_started(&self, stage: usize) {
        self.jobs_started
            .with_label_values(&[&stage.to_string()])
            .inc();
        self.running_jobs.inc();
    }

    /// Record the end of a job.
    pub fn record_job_ended(&self, stage: usize, success: bool, duration_secs: f64) {
        let stage = stage.to_string();
        if success {
            self.jobs_completed.with_label_values(&[&stage]).inc();
        } else {
            self.jobs_failed.with_label_values(&[&stage]).inc();
        }
        self.job_duration
            .with_label_values(&[&stage])
            .observe(duration_secs);
        self.running_jobs.dec();
    }

    /// Add metered storage traffic.
    pub fn record_storage_bytes(&self, read: u64, written: u64) {
        self.bytes_read.inc_by(read);
        self.bytes_written.inc_by(written);
    }

    /// Track a request being served; the returned guard decrements the
    /// gauge when dropped.
    pub fn request_started(&self, tier: &str) -> ActiveRequestGuard {
        let gauge = self.active_requests.with_label_values(&[tier]);
        gauge.inc();
        ActiveRequestGuard { gauge }
    }

    /// Encode all metrics in Prometheus text format.
    pub fn encode(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .expect("encoding should not fail");

        String::from_utf8(buffer).expect("metrics should be valid UTF-8")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("running_jobs", &self.running_jobs.get())
            .finish_non_exhaustive()
    }
}

/// Decrements the active request gauge on drop.
pub struct ActiveRequestGuard {
    gauge: IntGauge,
}

impl Drop for ActiveRequestGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_creation() {
        let metrics = Metrics::new();
        metrics.record_block("tier1", 0.01);
        assert!(metrics.encode().contains("strata_blocks_processed_total"));
    }

    #[test]
    fn running_jobs_goes_back_down() {
        let metrics = Metrics::new();
        metrics.record_job_started(0);
        metrics.record_job_started(1);
        assert_eq!(metrics.running_jobs.get(), 2);

        metrics.record_job_ended(0, true, 1.0);
        metrics.record_job_ended(1, false, 2.0);
        assert_eq!(metrics.running_jobs.get(), 0);

        let output = metrics.encode();
        assert!(output.contains("strata_jobs_completed_total"));
        assert!(output.contains("strata_jobs_failed_total"));
        assert!(output.contains("strata_job_duration_seconds"));
    }

    #[test]
    fn module_outcomes_are_labeled() {
        let metrics = Metrics::new();
        metrics.record_module("map_transfers", "cached");
        metrics.record_module("map_transfers", "cached");
        metrics.record_module("map_transfers", "executed");
        assert_eq!(
            metrics
                .module_executions
                .with_label_values(&["map_transfers", "cached"])
                .get(),
            2
        );
    }

    #[test]
    fn active_request_guard() {
        let metrics = Metrics::new();
        {
            let _guard = metrics.request_started("tier2");
            assert_eq!(metrics.active_requests.with_label_values(&["tier2"]).get(), 1);
        }
        assert_eq!(metrics.active_requests.with_label_values(&["tier2"]).get(), 0);
    }

    #[test]
    fn storage_bytes() {
        let metrics = Metrics::new();
        metrics.record_storage_bytes(10, 20);
        assert_eq!(metrics.bytes_read.get(), 10);
        assert_eq!(metrics.bytes_written.get(), 20);
    }
}
