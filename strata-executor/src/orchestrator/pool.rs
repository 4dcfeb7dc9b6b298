//! Bounded pool dispatching segment jobs to Tier-2.

use super::job::Job;
use super::progress::ProgressReporter;
use crate::config::RuntimeConfig;
use crate::metrics::Metrics;
use crate::service::{ProcessRangeRequest, Tier2Client};
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strata_core::error::{Result, StrataError};
use strata_core::pb::{process_range_response, Failed, PbBlockRange};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Retry settings of the pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Jobs running at once.
    pub workers: usize,
    /// Attempts per job, the first one included.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on every retry.
    pub retry_delay: Duration,
    /// Upper bound of the retry delay.
    pub max_retry_delay: Duration,
}

impl PoolConfig {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.retry_delay
            .saturating_mul(factor)
            .min(self.max_retry_delay)
    }
}

impl From<&RuntimeConfig> for PoolConfig {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            workers: config.parallel_workers.max(1),
            max_attempts: config.max_job_attempts.max(1),
            retry_delay: config.job_retry_delay(),
            max_retry_delay: config.job_retry_max_delay(),
        }
    }
}

/// Runs jobs on at most `workers` Tier-2 streams at once.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    client: Arc<dyn Tier2Client>,
    config: PoolConfig,
    metrics: Option<Arc<Metrics>>,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn new(client: Arc<dyn Tier2Client>, config: PoolConfig, cancel: CancellationToken) -> Self {
        Self {
            client,
            config,
            metrics: None,
            cancel,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run every job, `template` giving the request fields shared by all.
    ///
    /// Any job failing permanently aborts the others and is returned.
    pub async fn run(
        &self,
        jobs: Vec<Job>,
        template: &ProcessRangeRequest,
        progress: &mut ProgressReporter,
    ) -> Result<()> {
        if jobs.is_empty() {
            return Ok(());
        }
        info!(jobs = jobs.len(), workers = self.config.workers, "dispatching segment jobs");

        let semaphore = Arc::new(Semaphore::new(self.config.workers));
        let mut tasks: JoinSet<(Job, Result<Vec<PbBlockRange>>)> = JoinSet::new();

        for job in jobs {
            let mut request = template.clone();
            request.stage = job.stage;
            request.segment_number = job.segment;

            let semaphore = Arc::clone(&semaphore);
            let client = Arc::clone(&self.client);
            let metrics = self.metrics.clone();
            let cancel = self.cancel.clone();
            let config = self.config;

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        let err = StrataError::Canceled {
                            cause: "worker pool closed".to_string(),
                        };
                        return (job, Err(err));
                    }
                };

                let started = Instant::now();
                if let Some(metrics) = &metrics {
                    metrics.record_job_started(job.stage);
                }
                let result = run_with_retries(client.as_ref(), request, &job, config, &cancel).await;
                if let Some(metrics) = &metrics {
                    metrics.record_job_ended(job.stage, result.is_ok(), started.elapsed().as_secs_f64());
                }
                (job, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (job, result) = joined.map_err(|e| StrataError::Internal {
                cause: format!("segment job task failed: {e}"),
            })?;
            match result {
                Ok(ranges) => {
                    debug!(job = %job, ranges = ranges.len(), "segment job completed");
                    progress.job_completed(&job).await?;
                }
                Err(err) => {
                    error!(job = %job, error = %err, "segment job failed");
                    tasks.abort_all();
                    return Err(err);
                }
            }
        }
        Ok(())
    }
}

/// Run one job, retrying transient failures with exponential backoff.
pub async fn run_with_retries(
    client: &dyn Tier2Client,
    request: ProcessRangeRequest,
    job: &Job,
    config: PoolConfig,
    cancel: &CancellationToken,
) -> Result<Vec<PbBlockRange>> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(StrataError::Canceled { cause: format!("job {job} canceled") });
            }
            outcome = run_once(client, request.clone(), job) => outcome,
        };

        match outcome {
            Ok(ranges) => return Ok(ranges),
            Err(err) if err.is_retriable() && attempt < config.max_attempts => {
                let delay = config.backoff(attempt);
                warn!(job = %job, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying segment job");
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(StrataError::Canceled { cause: format!("job {job} canceled") });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(err) if err.is_retriable() => {
                return Err(StrataError::JobFailed {
                    job: job.to_string(),
                    attempts: attempt,
                    cause: err.to_string(),
                });
            }
            Err(err) => return Err(err),
        }
    }
}

async fn run_once(client: &dyn Tier2Client, request: ProcessRangeRequest, job: &Job) -> Result<Vec<PbBlockRange>> {
    let mut responses = client
        .process_range(request)
        .await
        .map_err(|e| transient(job, e.to_string()))?;

    while let Some(response) = responses.next().await {
        let response = response.map_err(|e| transient(job, e.to_string()))?;
        match response.r#type {
            Some(process_range_response::Type::Completed(completed)) => {
                return Ok(completed.processed_ranges);
            }
            Some(process_range_response::Type::Failed(failed)) => {
                return Err(remote_error(job, failed));
            }
            Some(process_range_response::Type::Progress(_)) | None => {}
        }
    }
    Err(transient(job, "stream ended before completion".to_string()))
}

/// Rebuild an error reported by Tier-2. Storage and worker failures are
/// retried, module faults are kept as such with the block they happened on,
/// anything else is permanent.
pub fn remote_error(job: &Job, failed: Failed) -> StrataError {
    if failed.code.starts_with("E5") || failed.code.starts_with("E6") {
        return transient(job, failed.reason);
    }
    if failed.code.starts_with("E3") {
        return StrataError::ModuleExecution {
            module: job.modules.join(","),
            block: failed.failed_block.unwrap_or(job.range.start),
            cause: failed.reason,
        };
    }
    StrataError::JobFailed {
        job: job.to_string(),
        attempts: 1,
        cause: failed.reason,
    }
}

fn transient(job: &Job, cause: String) -> StrataError {
    StrataError::WorkerTransient {
        job: job.to_string(),
        cause,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{Input, Module};
    use crate::plan::compute_stages;
    use crate::service::ResponseStream;
    use async_trait::async_trait;
    use futures::stream;
    use std::sync::atomic::{AtomicU32, Ordering};
    use strata_core::block::BlockRange;
    use strata_core::pb::{Completed, ProcessRangeResponse};
    use strata_core::store::{UpdatePolicy, ValueType};

    /// Fails with `code` the first `failures` calls, then completes.
    #[derive(Debug)]
    struct FlakyClient {
        failures: u32,
        code: &'static str,
        calls: AtomicU32,
    }

    impl FlakyClient {
        fn new(failures: u32, code: &'static str) -> Self {
            Self {
                failures,
                code,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Tier2Client for FlakyClient {
        async fn process_range(&self, request: ProcessRangeRequest) -> Result<ResponseStream> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let kind = if call < self.failures {
                process_range_response::Type::Failed(Failed {
                    reason: "boom".into(),
                    code: self.code.into(),
                    ..Failed::default()
                })
            } else {
                let start = request.segment_number * request.segment_size;
                process_range_response::Type::Completed(Completed {
                    processed_ranges: vec![PbBlockRange {
                        start_block: start,
                        end_block: start + request.segment_size,
                    }],
                })
            };
            let response = ProcessRangeResponse { r#type: Some(kind) };
            Ok(stream::iter(vec![Ok(response)]).boxed())
        }
    }

    fn config(max_attempts: u32) -> PoolConfig {
        PoolConfig {
            workers: 2,
            max_attempts,
            retry_delay: Duration::from_millis(1),
            max_retry_delay: Duration::from_millis(4),
        }
    }

    fn job(segment: u64) -> Job {
        Job::new(0, segment, BlockRange::new(segment * 10, segment * 10 + 10), vec!["store_a".into()])
    }

    fn template() -> ProcessRangeRequest {
        ProcessRangeRequest {
            output_module: "map_a".into(),
            segment_size: 10,
            ..ProcessRangeRequest::default()
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = config(5);
        assert_eq!(config.backoff(1), Duration::from_millis(1));
        assert_eq!(config.backoff(2), Duration::from_millis(2));
        assert_eq!(config.backoff(10), Duration::from_millis(4));
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let client = FlakyClient::new(2, "E502");
        let ranges = run_with_retries(&client, template(), &job(1), config(3), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(ranges[0].start_block, 10);
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let client = FlakyClient::new(10, "E601");
        let err = run_with_retries(&client, template(), &job(1), config(3), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "E602");
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn remote_module_faults_keep_their_block() {
        let failed = Failed {
            reason: "boom".into(),
            code: "E302".into(),
            failed_block: Some(17),
            ..Failed::default()
        };
        let err = remote_error(&job(1), failed);
        assert_eq!(err.code(), "E303");
        assert_eq!(err.failed_block(), Some(17));

        let without_block = Failed {
            code: "E303".into(),
            ..Failed::default()
        };
        assert_eq!(remote_error(&job(1), without_block).failed_block(), Some(10));
    }

    #[tokio::test]
    async fn module_faults_are_not_retried() {
        let client = FlakyClient::new(1, "E302");
        let err = run_with_retries(&client, template(), &job(1), config(3), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_module_fault());
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pool_reports_progress_per_job() {
        let client: Arc<dyn Tier2Client> = Arc::new(FlakyClient::new(0, ""));
        let pool = WorkerPool::new(client, config(1), CancellationToken::new());
        let store = Module::store("store_a", UpdatePolicy::Set, ValueType::String)
            .with_input(Input::source("test.Block"));
        let stages = compute_stages(&[store]).unwrap();
        let mut progress = ProgressReporter::new(None, &stages);
        pool.run(vec![job(0), job(1), job(2)], &template(), &mut progress)
            .await
            .unwrap();
        assert_eq!(
            progress.completed_ranges(0),
            &[PbBlockRange {
                start_block: 0,
                end_block: 30
            }]
        );
    }
}
