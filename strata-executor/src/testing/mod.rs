//! Test fixtures: an in-memory chain, WAT guests and a runner serving
//! requests through both tiers.
//!
//! ```ignore
//! use strata_executor::testing::{counter_package, MemoryBlockSource, StreamRunner};
//!
//! let runner = StreamRunner::builder()
//!     .with_source(MemoryBlockSource::new().with_final_range(0..100))
//!     .build()?;
//! let result = runner
//!     .run(BlocksRequest::new(counter_package(0), "map_count", 42, 50))
//!     .await;
//! assert_eq!(result.outputs()[0], (42, b"43".to_vec()));
//! ```

mod guests;
mod runner;
mod source;

pub use guests::{
    append_package, counter_package, echo_package, full_package, guest_binary, panic_package,
    spin_package, BLOCK_TYPE, GUEST_WAT,
};
pub use runner::{RecordingTier2Client, StreamResult, StreamRunner, StreamRunnerBuilder};
pub use source::{block, fork_block, MemoryBlockSource};
