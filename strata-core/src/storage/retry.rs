use crate::error::{Result, StrataError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Bounded exponential backoff for storage and worker calls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after every failure.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Policy used when loading artifacts: 5 attempts.
    pub fn loads() -> Self {
        Self {
            max_attempts: 5,
            ..Self::default()
        }
    }

    /// Policy used when saving artifacts: 10 attempts.
    pub fn saves() -> Self {
        Self {
            max_attempts: 10,
            ..Self::default()
        }
    }

    /// Policy used when listing snapshot files: 3 attempts.
    pub fn listings() -> Self {
        Self {
            max_attempts: 3,
            ..Self::default()
        }
    }

    /// Set the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Delay to wait after `attempt` (1-based) failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .backoff_multiplier
            .powi(attempt.saturating_sub(1) as i32);
        let ms = (self.initial_delay_ms as f64 * exp).min(self.max_delay_ms as f64);
        Duration::from_millis(ms as u64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 50,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retriable error, or runs out
/// of attempts. The last error is returned.
pub async fn retry<T, F, Fut>(config: RetryConfig, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(err) if err.is_retriable() && attempt < config.max_attempts => {
                let delay = config.delay_for(attempt);
                warn!(
                    what,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// True for errors that mean "the object is not there".
pub(crate) fn is_not_found(err: &StrataError) -> bool {
    matches!(err, StrataError::ObjectNotFound { .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> StrataError {
        StrataError::Storage {
            operation: "read",
            name: "x".to_string(),
            cause: "flaky".to_string(),
        }
    }

    #[test]
    fn delays_grow_and_cap() {
        let cfg = RetryConfig {
            max_attempts: 10,
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            backoff_multiplier: 2.0,
        };
        assert_eq!(cfg.delay_for(1), Duration::from_millis(100));
        assert_eq!(cfg.delay_for(2), Duration::from_millis(200));
        assert_eq!(cfg.delay_for(3), Duration::from_millis(400));
        assert_eq!(cfg.delay_for(8), Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let out = retry(RetryConfig::loads(), "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                Err(transient())
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let res: Result<()> = retry(RetryConfig::loads(), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(transient())
        })
        .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let calls = AtomicU32::new(0);
        let res: Result<()> = retry(RetryConfig::saves(), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StrataError::ObjectNotFound {
                name: "x".to_string(),
            })
        })
        .await;
        assert!(is_not_found(&res.unwrap_err()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
