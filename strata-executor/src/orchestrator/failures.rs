//! Tier-1 blacklist of requests that keep failing.
//!
//! A request fingerprint that fails `failure_threshold` times within the
//! sliding window is short-circuited: identical requests are answered with
//! the recorded error after a forced backoff that grows with every hit.

use crate::config::RuntimeConfig;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use strata_core::error::StrataError;
use tracing::{debug, warn};

/// Configuration for the failure recorder.
#[derive(Debug, Clone)]
pub struct FailureRecorderConfig {
    /// Failures within the window before a fingerprint is blacklisted.
    pub failure_threshold: u32,
    /// Sliding window for counting failures.
    pub failure_window: Duration,
    /// Backoff added for every short-circuited hit.
    pub backoff_step: Duration,
    /// Upper bound of the forced backoff.
    pub max_backoff: Duration,
}

impl Default for FailureRecorderConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            failure_window: Duration::from_secs(600),
            backoff_step: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl From<&RuntimeConfig> for FailureRecorderConfig {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            failure_window: config.failure_window(),
            ..Self::default()
        }
    }
}

/// Identity of a request for failure accounting.
pub fn fingerprint(identity: &str, modules_hash: &str, output_module: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identity.as_bytes());
    hasher.update([0]);
    hasher.update(modules_hash.as_bytes());
    hasher.update([0]);
    hasher.update(output_module.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug)]
struct RecordedFailure {
    failures: VecDeque<Instant>,
    block: u64,
    error: StrataError,
    hits: u32,
}

/// A short-circuited request: wait `backoff`, then fail with `error`.
#[derive(Debug, Clone)]
pub struct ShortCircuit {
    /// Forced delay before answering.
    pub backoff: Duration,
    /// Error returned to the client.
    pub error: StrataError,
}

/// Failures recorded per request fingerprint, shared across requests.
#[derive(Debug)]
pub struct FailureRecorder {
    config: FailureRecorderConfig,
    failures: RwLock<HashMap<String, RecordedFailure>>,
}

impl FailureRecorder {
    pub fn new(config: FailureRecorderConfig) -> Self {
        Self {
            config,
            failures: RwLock::new(HashMap::new()),
        }
    }

    /// Record a module fault of `fingerprint` at `block`.
    pub fn record_failure(&self, fingerprint: &str, block: u64, error: &StrataError) {
        let now = Instant::now();
        let window = self.config.failure_window;

        let mut failures = self.failures.write();
        prune_expired(&mut failures, now, window);
        let entry = failures
            .entry(fingerprint.to_string())
            .or_insert_with(|| RecordedFailure {
                failures: VecDeque::new(),
                block,
                error: error.clone(),
                hits: 0,
            });

        while let Some(&oldest) = entry.failures.front() {
            if now.duration_since(oldest) > window {
                entry.failures.pop_front();
            } else {
                break;
            }
        }
        if entry.block != block {
            entry.failures.clear();
            entry.hits = 0;
        }
        entry.failures.push_back(now);
        entry.block = block;
        entry.error = error.clone();

        warn!(
            fingerprint,
            block,
            failures = entry.failures.len(),
            code = error.code(),
            "recorded request failure"
        );
    }

    /// Forget the failures of `fingerprint`.
    pub fn record_success(&self, fingerprint: &str) {
        if self.failures.write().remove(fingerprint).is_some() {
            debug!(fingerprint, "cleared recorded failures");
        }
    }

    /// Whether a request of `fingerprint` starting at `start_block` must be
    /// short-circuited.
    ///
    /// Development requests starting before the failure block never reached
    /// it and are served.
    pub fn check(&self, fingerprint: &str, start_block: u64, production_mode: bool) -> Option<ShortCircuit> {
        let now = Instant::now();
        let mut failures = self.failures.write();
        prune_expired(&mut failures, now, self.config.failure_window);
        let entry = failures.get_mut(fingerprint)?;

        let recent = entry
            .failures
            .iter()
            .filter(|at| now.duration_since(**at) <= self.config.failure_window)
            .count();
        if recent < self.config.failure_threshold as usize {
            return None;
        }
        if !production_mode && start_block < entry.block {
            return None;
        }

        entry.hits += 1;
        let backoff = self
            .config
            .backoff_step
            .saturating_mul(entry.hits)
            .min(self.config.max_backoff);
        Some(ShortCircuit {
            backoff,
            error: StrataError::PreviouslyFailed {
                block: entry.block,
                cause: entry.error.to_string(),
            },
        })
    }

    /// Number of fingerprints with recorded failures.
    pub fn len(&self) -> usize {
        self.failures.read().len()
    }

    /// True when nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.failures.read().is_empty()
    }
}

/// Drop fingerprints whose newest failure left the window.
fn prune_expired(failures: &mut HashMap<String, RecordedFailure>, now: Instant, window: Duration) {
    let before = failures.len();
    failures.retain(|_, entry| {
        entry
            .failures
            .back()
            .is_some_and(|newest| now.duration_since(*newest) <= window)
    });
    let pruned = before - failures.len();
    if pruned > 0 {
        debug!(pruned, "expired recorded failures");
    }
}

impl Default for FailureRecorder {
    fn default() -> Self {
        Self::new(FailureRecorderConfig::default())
    }
}
