//! Background production of store snapshots and output caches.
//!
//! A request's plan names the ranges that must be built before the live
//! pipeline can start. The [`Orchestrator`] finds the segments missing from
//! storage, dispatches them as Tier-2 jobs through the [`WorkerPool`] stage
//! by stage, and squashes the resulting partial store snapshots into full
//! ones. The [`LiveBackFiller`] keeps extending the cache while a request
//! streams live blocks, and the [`FailureRecorder`] short-circuits requests
//! that keep failing.

mod backfiller;
mod failures;
mod job;
mod pool;
mod progress;
mod scheduler;
mod squasher;

pub use backfiller::{BackFillerConfig, LiveBackFiller, SegmentRunner};
pub use failures::{fingerprint, FailureRecorder, FailureRecorderConfig, ShortCircuit};
pub use job::Job;
pub use pool::{remote_error, run_with_retries, PoolConfig, WorkerPool};
pub use progress::ProgressReporter;
pub use scheduler::Orchestrator;
pub use squasher::{squash, StoreFiles};
