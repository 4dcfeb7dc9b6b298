//! Requests accepted by the two tiers.

use crate::manifest::Package;
use serde::{Deserialize, Serialize};
use strata_core::block::{BlockRange, Segmenter};
use strata_core::error::{Result, StrataError};

/// A client request to Tier-1.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlocksRequest {
    /// First block whose output is sent.
    pub start_block: u64,
    /// Resume point from a previous stream; overrides `start_block`.
    #[serde(default)]
    pub start_cursor: Option<String>,
    /// Exclusive end block; `0` streams forever.
    #[serde(default)]
    pub stop_block: u64,
    /// Module whose outputs are streamed.
    pub output_module: String,
    /// Modules and binaries.
    pub package: Package,
    /// Cache outputs in the background and never emit debug outputs.
    #[serde(default)]
    pub production_mode: bool,
    /// Stores whose initial state is dumped for debugging.
    #[serde(default)]
    pub debug_initial_store_snapshot_for_modules: Vec<String>,
    /// Caller identity, part of the failure fingerprint.
    #[serde(default)]
    pub identity: String,
}

impl BlocksRequest {
    pub fn new(package: Package, output_module: impl Into<String>, start_block: u64, stop_block: u64) -> Self {
        Self {
            start_block,
            stop_block,
            output_module: output_module.into(),
            package,
            ..Self::default()
        }
    }

    pub fn with_production_mode(mut self, enabled: bool) -> Self {
        self.production_mode = enabled;
        self
    }

    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.start_cursor = Some(cursor.into());
        self
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn with_debug_snapshots(mut self, stores: Vec<String>) -> Self {
        self.debug_initial_store_snapshot_for_modules = stores;
        self
    }

    /// Stop block, `None` when streaming forever.
    pub fn stop(&self) -> Option<u64> {
        (self.stop_block != 0).then_some(self.stop_block)
    }

    /// Checks that do not need the module graph.
    pub fn validate(&self) -> Result<()> {
        if self.output_module.is_empty() {
            return Err(invalid("no output module specified"));
        }
        if self.production_mode && !self.debug_initial_store_snapshot_for_modules.is_empty() {
            return Err(invalid("debug store snapshots are not allowed in production mode"));
        }
        if let Some(stop) = self.stop() {
            if stop <= self.start_block && self.start_cursor.is_none() {
                return Err(invalid(format!(
                    "stop block {stop} must be after start block {}",
                    self.start_block
                )));
            }
        }
        Ok(())
    }
}

/// A Tier-1 request to Tier-2: execute one stage over one segment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessRangeRequest {
    /// Modules and binaries.
    pub package: Package,
    /// Output module of the originating request.
    pub output_module: String,
    /// Stage whose artifacts are produced.
    pub stage: usize,
    /// Absolute segment number.
    pub segment_number: u64,
    /// Segment size.
    pub segment_size: u64,
    /// Lowest block the block source can serve.
    pub first_streamable_block: u64,
    /// Exclusive end clipping the last segment; `0` for none.
    #[serde(default)]
    pub stop_block: u64,
    /// Type URL of the blocks.
    pub block_type: String,
    /// Production mode of the originating request.
    #[serde(default)]
    pub production_mode: bool,
}

impl ProcessRangeRequest {
    /// Blocks the request covers, clipped below to `initial_block`.
    pub fn range(&self, initial_block: u64) -> Result<BlockRange> {
        if self.segment_size == 0 {
            return Err(invalid("segment size must be positive"));
        }
        let end = if self.stop_block == 0 {
            u64::MAX
        } else {
            self.stop_block
        };
        Segmenter::new(self.segment_size, initial_block, end)
            .range(self.segment_number)
            .ok_or_else(|| {
                invalid(format!(
                    "segment {} holds no block between {initial_block} and {end}",
                    self.segment_number
                ))
            })
    }

    /// Reject segments ending before the first streamable block.
    pub fn validate(&self, range: BlockRange) -> Result<()> {
        if self.output_module.is_empty() {
            return Err(invalid("no output module specified"));
        }
        if range.exclusive_end <= self.first_streamable_block {
            return Err(StrataError::SegmentBeforeFirstStreamable {
                segment: self.segment_number,
                end: range.exclusive_end,
                first_streamable: self.first_streamable_block,
            });
        }
        Ok(())
    }
}

fn invalid(cause: impl Into<String>) -> StrataError {
    StrataError::InvalidRequest {
        cause: cause.into(),
    }
}
