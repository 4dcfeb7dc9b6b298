//! Block-level types shared by every layer.

use crate::error::{Result, StrataError};
use crate::pb::Clock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A block number.
pub type BlockNum = u64;

/// Fork step attached to a block delivered by the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForkStep {
    /// A new, possibly reversible block.
    New,
    /// A previously delivered reversible block is being reverted.
    Undo,
    /// A block became final.
    Final,
}

impl fmt::Display for ForkStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Undo => "undo",
            Self::Final => "final",
        };
        f.write_str(s)
    }
}

/// A block as delivered by the block source: its clock and opaque payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// Block identity.
    pub clock: Clock,
    /// Serialized block, never interpreted by the engine.
    pub payload: Vec<u8>,
}

impl Block {
    /// Build a block.
    pub fn new(clock: Clock, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            clock,
            payload: payload.into(),
        }
    }

    /// Block number.
    pub fn number(&self) -> BlockNum {
        self.clock.number
    }

    /// Block id.
    pub fn id(&self) -> &str {
        &self.clock.id
    }
}

/// A block with the fork step under which it is delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockEvent {
    /// Fork step.
    pub step: ForkStep,
    /// The block.
    pub block: Block,
}

impl BlockEvent {
    /// Build an event.
    pub fn new(step: ForkStep, block: Block) -> Self {
        Self { step, block }
    }
}

/// Opaque resume position handed to clients with every block.
///
/// Encoded as `c1:{step}:{number}:{id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    /// Step of the block the cursor points at.
    pub step: ForkStep,
    /// Block number.
    pub block_num: BlockNum,
    /// Block id.
    pub block_id: String,
}

impl Cursor {
    /// Cursor for `clock` under `step`.
    pub fn new(step: ForkStep, clock: &Clock) -> Self {
        Self {
            step,
            block_num: clock.number,
            block_id: clock.id.clone(),
        }
    }

    /// First block to stream when resuming from this cursor.
    pub fn resume_block(&self) -> BlockNum {
        match self.step {
            ForkStep::Undo => self.block_num,
            ForkStep::New | ForkStep::Final => self.block_num + 1,
        }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c1:{}:{}:{}", self.step, self.block_num, self.block_id)
    }
}

impl FromStr for Cursor {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || StrataError::InvalidRequest {
            cause: format!("invalid cursor '{s}'"),
        };
        let mut parts = s.splitn(4, ':');
        if parts.next() != Some("c1") {
            return Err(invalid());
        }
        let step = match parts.next() {
            Some("new") => ForkStep::New,
            Some("undo") => ForkStep::Undo,
            Some("final") => ForkStep::Final,
            _ => return Err(invalid()),
        };
        let block_num = parts
            .next()
            .and_then(|n| n.parse().ok())
            .ok_or_else(invalid)?;
        let block_id = parts.next().ok_or_else(invalid)?.to_string();
        Ok(Self {
            step,
            block_num,
            block_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_roundtrip() {
        let clock = Clock::new(42, "0xabc", 1_700_000_000);
        let cursor = Cursor::new(ForkStep::Final, &clock);
        let encoded = cursor.to_string();
        assert_eq!(encoded, "c1:final:42:0xabc");
        assert_eq!(encoded.parse::<Cursor>().unwrap(), cursor);
        assert_eq!(cursor.resume_block(), 43);
    }

    #[test]
    fn cursor_rejects_garbage() {
        assert!("".parse::<Cursor>().is_err());
        assert!("c1:sideways:1:a".parse::<Cursor>().is_err());
        assert!("c1:new:abc:a".parse::<Cursor>().is_err());
    }
}
