use std::fmt;
use strata_core::block::BlockRange;

/// One Tier-2 unit of work: execute the modules of stages `0..=stage` over
/// one segment, persisting the artifacts of `stage`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Stage whose stores and outputs the job produces.
    pub stage: usize,
    /// Absolute segment number.
    pub segment: u64,
    /// Blocks covered, already clipped to initial and end blocks.
    pub range: BlockRange,
    /// Names of the modules of `stage`.
    pub modules: Vec<String>,
}

impl Job {
    pub fn new(stage: usize, segment: u64, range: BlockRange, modules: Vec<String>) -> Self {
        Self {
            stage,
            segment,
            range,
            modules,
        }
    }

    /// Ordering key: lower stages first, then lower segments.
    pub fn priority(&self) -> (usize, u64) {
        (self.stage, self.segment)
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage {} segment {} ({})", self.stage, self.segment, self.range)
    }
}
