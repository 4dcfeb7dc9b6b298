use super::BlockRange;
use crate::types::BlockNum;

/// True when `block` starts a segment of `interval` blocks.
pub fn is_boundary(block: BlockNum, interval: u64) -> bool {
    interval != 0 && block % interval == 0
}

/// The boundary at or before `block`.
pub fn previous_boundary(block: BlockNum, interval: u64) -> BlockNum {
    block - block % interval
}

/// The first boundary strictly after `block`.
pub fn next_boundary(block: BlockNum, interval: u64) -> BlockNum {
    previous_boundary(block, interval) + interval
}

/// Maps absolute segment indices to block ranges.
///
/// Segment `n` covers `[n * interval, (n + 1) * interval)`, clipped below to
/// the initial block and above to the exclusive end block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segmenter {
    interval: u64,
    initial_block: BlockNum,
    exclusive_end_block: BlockNum,
}

impl Segmenter {
    /// Create a segmenter. `interval` must be non-zero.
    pub fn new(interval: u64, initial_block: BlockNum, exclusive_end_block: BlockNum) -> Self {
        debug_assert!(interval > 0, "segment interval must be positive");
        Self {
            interval,
            initial_block,
            exclusive_end_block,
        }
    }

    /// Segment size.
    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// Lowest block covered.
    pub fn initial_block(&self) -> BlockNum {
        self.initial_block
    }

    /// One past the last block covered.
    pub fn exclusive_end_block(&self) -> BlockNum {
        self.exclusive_end_block
    }

    /// A segmenter over the same interval whose first segment is clipped to
    /// `block` when it is higher than the current initial block.
    pub fn with_initial_block(&self, block: BlockNum) -> Self {
        Self::new(
            self.interval,
            self.initial_block.max(block),
            self.exclusive_end_block,
        )
    }

    /// A segmenter over the same interval ending at `block`.
    pub fn with_exclusive_end(&self, block: BlockNum) -> Self {
        Self::new(self.interval, self.initial_block, block)
    }

    /// Segment index holding `block`.
    pub fn index_for_block(&self, block: BlockNum) -> u64 {
        block / self.interval
    }

    /// Index of the first segment.
    pub fn first_index(&self) -> u64 {
        self.index_for_block(self.initial_block)
    }

    /// Index of the last segment, `None` when the segmenter covers no block.
    pub fn last_index(&self) -> Option<u64> {
        if self.exclusive_end_block <= self.initial_block {
            return None;
        }
        Some(self.index_for_block(self.exclusive_end_block - 1))
    }

    /// Number of segments.
    pub fn count(&self) -> u64 {
        self.last_index()
            .map(|last| last - self.first_index() + 1)
            .unwrap_or(0)
    }

    /// Block range of segment `index`, clipped to the covered blocks.
    pub fn range(&self, index: u64) -> Option<BlockRange> {
        let start = (index * self.interval).max(self.initial_block);
        let end = ((index + 1) * self.interval).min(self.exclusive_end_block);
        if start >= end {
            return None;
        }
        Some(BlockRange::new(start, end))
    }

    /// Exclusive end of segment `index` before clipping.
    pub fn end_block(&self, index: u64) -> BlockNum {
        (index + 1) * self.interval
    }

    /// True when segment `index` stops before its natural boundary.
    pub fn is_partial(&self, index: u64) -> bool {
        self.range(index)
            .map(|r| r.exclusive_end < self.end_block(index))
            .unwrap_or(false)
    }

    /// True when segment `index` starts after its natural boundary.
    pub fn is_clipped_at_start(&self, index: u64) -> bool {
        self.range(index)
            .map(|r| r.start > index * self.interval)
            .unwrap_or(false)
    }

    /// All segments as `(index, range)` pairs.
    pub fn segments(&self) -> impl Iterator<Item = (u64, BlockRange)> + '_ {
        let first = self.first_index();
        let last = self.last_index();
        let upper = last.map(|l| l + 1).unwrap_or(first);
        (first..upper).filter_map(move |i| self.range(i).map(|r| (i, r)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundaries() {
        assert!(is_boundary(20, 10));
        assert!(!is_boundary(21, 10));
        assert_eq!(previous_boundary(27, 10), 20);
        assert_eq!(next_boundary(27, 10), 30);
        assert_eq!(next_boundary(30, 10), 40);
    }

    #[test]
    fn first_segment_is_clipped_to_initial_block() {
        let seg = Segmenter::new(10, 105, 130);
        assert_eq!(seg.first_index(), 10);
        assert_eq!(seg.last_index(), Some(12));
        assert_eq!(seg.range(10), Some(BlockRange::new(105, 110)));
        assert_eq!(seg.range(11), Some(BlockRange::new(110, 120)));
        assert!(seg.is_clipped_at_start(10));
        assert!(!seg.is_clipped_at_start(11));
        assert_eq!(seg.range(9), None);
        assert_eq!(seg.range(13), None);
        assert_eq!(seg.count(), 3);
    }

    #[test]
    fn last_segment_is_clipped_to_end() {
        let seg = Segmenter::new(10, 0, 25);
        assert_eq!(seg.range(2), Some(BlockRange::new(20, 25)));
        assert!(seg.is_partial(2));
        assert!(!seg.is_partial(1));
        let all: Vec<_> = seg.segments().map(|(i, _)| i).collect();
        assert_eq!(all, vec![0, 1, 2]);
    }

    #[test]
    fn index_for_block() {
        let seg = Segmenter::new(10, 0, 100);
        assert_eq!(seg.index_for_block(0), 0);
        assert_eq!(seg.index_for_block(9), 0);
        assert_eq!(seg.index_for_block(10), 1);
    }

    #[test]
    fn empty_segmenter() {
        let seg = Segmenter::new(10, 50, 50);
        assert_eq!(seg.last_index(), None);
        assert_eq!(seg.count(), 0);
        assert_eq!(seg.segments().count(), 0);
    }

    #[test]
    fn with_initial_block_only_moves_forward() {
        let seg = Segmenter::new(10, 20, 100);
        assert_eq!(seg.with_initial_block(35).range(3), Some(BlockRange::new(35, 40)));
        assert_eq!(seg.with_initial_block(5).initial_block(), 20);
    }
}
