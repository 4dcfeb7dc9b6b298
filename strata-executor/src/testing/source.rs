use crate::service::{BlockSource, BlockStream, EventStream};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Range;
use strata_core::block::BlockRange;
use strata_core::error::{Result, StrataError};
use strata_core::pb::Clock;
use strata_core::types::{Block, BlockEvent, ForkStep};

/// Seconds between two test blocks.
const BLOCK_TIME_SECS: i64 = 12;

/// Canonical test block: id derived from the number, payload `block-{n}`.
pub fn block(number: u64) -> Block {
    fork_block(number, "a")
}

/// A block on branch `branch`, with an id distinct from other branches.
pub fn fork_block(number: u64, branch: &str) -> Block {
    let clock = Clock::new(number, format!("{number:08x}{branch}"), number as i64 * BLOCK_TIME_SECS);
    Block::new(clock, format!("block-{number}").into_bytes())
}

/// In-memory chain: a final history plus scripted live events.
///
/// [`BlockSource::stream`] yields the final history from the start block as
/// `Final` events, then the live events in order.
#[derive(Debug, Default)]
pub struct MemoryBlockSource {
    finals: RwLock<BTreeMap<u64, Block>>,
    live: RwLock<Vec<BlockEvent>>,
    first_streamable: u64,
    failing_block: Option<u64>,
}

impl MemoryBlockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Final history made of [`block`] for every number of `range`.
    pub fn with_final_range(self, range: Range<u64>) -> Self {
        self.with_final_blocks(range.map(block))
    }

    pub fn with_final_blocks(self, blocks: impl IntoIterator<Item = Block>) -> Self {
        {
            let mut finals = self.finals.write();
            for block in blocks {
                finals.insert(block.number(), block);
            }
        }
        self
    }

    /// Events yielded after the final history.
    pub fn with_live_events(self, events: impl IntoIterator<Item = BlockEvent>) -> Self {
        self.live.write().extend(events);
        self
    }

    pub fn with_first_streamable(mut self, block: u64) -> Self {
        self.first_streamable = block;
        self
    }

    /// Fail every read reaching `block`.
    pub fn with_failing_block(mut self, block: u64) -> Self {
        self.failing_block = Some(block);
        self
    }

    /// Append a final block to the history.
    pub fn push_final(&self, block: Block) {
        self.finals.write().insert(block.number(), block);
    }

    fn check(&self, block: u64) -> Result<()> {
        match self.failing_block {
            Some(failing) if failing == block => Err(StrataError::Storage {
                operation: "read",
                name: format!("block {block}"),
                cause: "block is unavailable".to_string(),
            }),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl BlockSource for MemoryBlockSource {
    async fn final_head(&self) -> Result<u64> {
        Ok(self.finals.read().keys().next_back().copied().unwrap_or(0))
    }

    fn first_streamable_block(&self) -> u64 {
        self.first_streamable
    }

    async fn final_blocks(&self, range: BlockRange) -> Result<BlockStream> {
        let blocks: Vec<Result<Block>> = self
            .finals
            .read()
            .range(range.start..range.exclusive_end)
            .map(|(number, block)| self.check(*number).map(|_| block.clone()))
            .collect();
        Ok(stream::iter(blocks).boxed())
    }

    async fn stream(&self, start_block: u64, stop_block: Option<u64>) -> Result<EventStream> {
        let before_stop = |n: u64| stop_block.map_or(true, |stop| n < stop);
        let mut events: Vec<Result<BlockEvent>> = self
            .finals
            .read()
            .range(start_block..)
            .filter(|(number, _)| before_stop(**number))
            .map(|(number, block)| {
                self.check(*number)
                    .map(|_| BlockEvent::new(ForkStep::Final, block.clone()))
            })
            .collect();
        events.extend(
            self.live
                .read()
                .iter()
                .filter(|e| e.step == ForkStep::Undo || (e.block.number() >= start_block && before_stop(e.block.number())))
                .cloned()
                .map(Ok),
        );
        Ok(stream::iter(events).boxed())
    }
}
