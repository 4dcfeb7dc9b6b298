use crate::types::BlockNum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Half-open block interval `[start, exclusive_end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockRange {
    /// First block of the range.
    pub start: BlockNum,
    /// One past the last block of the range.
    pub exclusive_end: BlockNum,
}

impl BlockRange {
    /// Create a range.
    pub const fn new(start: BlockNum, exclusive_end: BlockNum) -> Self {
        Self {
            start,
            exclusive_end,
        }
    }

    /// Number of blocks in the range.
    pub fn len(&self) -> u64 {
        self.exclusive_end.saturating_sub(self.start)
    }

    /// True when the range holds no block.
    pub fn is_empty(&self) -> bool {
        self.exclusive_end <= self.start
    }

    /// True when `block` is inside the range.
    pub fn contains(&self, block: BlockNum) -> bool {
        block >= self.start && block < self.exclusive_end
    }

    /// The range of `size` blocks right after this one.
    pub fn next(&self, size: u64) -> Self {
        Self::new(self.exclusive_end, self.exclusive_end + size)
    }

    /// Union of two adjacent or overlapping ranges.
    pub fn merged(&self, other: &Self) -> Option<Self> {
        if other.start > self.exclusive_end || self.start > other.exclusive_end {
            return None;
        }
        Some(Self::new(
            self.start.min(other.start),
            self.exclusive_end.max(other.exclusive_end),
        ))
    }

    /// Split into chunks aligned on multiples of `size`.
    ///
    /// `[5, 25)` split by 10 gives `[5, 10) [10, 20) [20, 25)`.
    pub fn split(&self, size: u64) -> Vec<Self> {
        if self.is_empty() || size == 0 {
            return vec![*self];
        }
        let mut out = Vec::new();
        let mut start = self.start;
        while start < self.exclusive_end {
            let end = next_multiple(start, size).min(self.exclusive_end);
            out.push(Self::new(start, end));
            start = end;
        }
        out
    }
}

fn next_multiple(block: BlockNum, size: u64) -> BlockNum {
    (block / size + 1) * size
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.exclusive_end)
    }
}
