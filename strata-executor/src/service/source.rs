use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use strata_core::block::BlockRange;
use strata_core::error::Result;
use strata_core::types::{Block, BlockEvent};

/// Final blocks of one range.
pub type BlockStream = BoxStream<'static, Result<Block>>;

/// Fork-aware events from a start block onward.
pub type EventStream = BoxStream<'static, Result<BlockEvent>>;

/// Where blocks come from: merged final history and the live chain.
#[async_trait]
pub trait BlockSource: Send + Sync + fmt::Debug {
    /// Highest final block available.
    async fn final_head(&self) -> Result<u64>;

    /// Lowest block the source can serve.
    fn first_streamable_block(&self) -> u64 {
        0
    }

    /// Final blocks of `range`, in order. Gaps in block numbers are allowed.
    async fn final_blocks(&self, range: BlockRange) -> Result<BlockStream>;

    /// Events from `start_block` onward: history as final blocks, then the
    /// live chain with its forks. Ends before `stop_block` when one is
    /// given.
    async fn stream(&self, start_block: u64, stop_block: Option<u64>) -> Result<EventStream>;
}
