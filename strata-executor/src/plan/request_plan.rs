use std::fmt;
use strata_core::block::{previous_boundary, BlockRange};

/// Which block ranges one request builds in the background and which it
/// streams live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestPlan {
    /// Range over which stores must be reconstituted as full KV files.
    pub build_stores: Option<BlockRange>,
    /// Range over which the output module's outputs are cached in segments
    /// and read back through the file walker.
    pub write_exec_out: Option<BlockRange>,
    /// Range executed live by the pipeline.
    pub linear_pipeline: Option<BlockRange>,
    /// Segment size.
    pub segment_interval: u64,
}

impl RequestPlan {
    /// Plan a request.
    ///
    /// `linear_handoff` is the first block the live pipeline executes. In
    /// development mode stores are built up to the requested start and
    /// everything after it runs live. In production mode the output module
    /// is cached from the segment holding `start` up to the handoff; stores
    /// are only needed at the handoff when a live part follows.
    pub fn build(
        production_mode: bool,
        segment_interval: u64,
        graph_initial_block: u64,
        start: u64,
        linear_handoff: u64,
        exclusive_end: u64,
    ) -> Self {
        let non_empty = |start: u64, end: u64| (start < end).then(|| BlockRange::new(start, end));

        if !production_mode {
            return Self {
                build_stores: non_empty(graph_initial_block, linear_handoff),
                write_exec_out: None,
                linear_pipeline: non_empty(linear_handoff, exclusive_end),
                segment_interval,
            };
        }

        let linear_pipeline = if linear_handoff != exclusive_end {
            non_empty(linear_handoff, exclusive_end)
        } else {
            None
        };

        let stores_end = if linear_pipeline.is_some() {
            linear_handoff
        } else {
            previous_boundary(linear_handoff.saturating_sub(1), segment_interval)
        };
        let build_stores = non_empty(graph_initial_block, stores_end.max(graph_initial_block));

        let exec_out_start = previous_boundary(start.max(graph_initial_block), segment_interval)
            .max(graph_initial_block);
        let write_exec_out = non_empty(exec_out_start, linear_handoff);

        Self {
            build_stores,
            write_exec_out,
            linear_pipeline,
            segment_interval,
        }
    }

    /// End of the background work: stores and outputs are complete up to
    /// this block.
    pub fn required_end(&self) -> u64 {
        let stores = self.build_stores.map(|r| r.exclusive_end).unwrap_or(0);
        let outputs = self.write_exec_out.map(|r| r.exclusive_end).unwrap_or(0);
        stores.max(outputs)
    }

    /// True when no background work is needed.
    pub fn is_linear_only(&self) -> bool {
        self.build_stores.is_none() && self.write_exec_out.is_none()
    }
}

impl fmt::Display for RequestPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn range(r: &Option<BlockRange>) -> String {
            r.map(|r| format!("{}-{}", r.start, r.exclusive_end))
                .unwrap_or_else(|| "nil".to_string())
        }
        write!(
            f,
            "interval={}, stores={}, exec_out={}, linear={}",
            self.segment_interval,
            range(&self.build_stores),
            range(&self.write_exec_out),
            range(&self.linear_pipeline)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(production: bool, init: u64, start: u64, handoff: u64, end: u64) -> String {
        RequestPlan::build(production, 100, init, start, handoff, end).to_string()
    }

    #[test]
    fn development_streams_from_start() {
        assert_eq!(
            plan(false, 621, 738, 738, 742),
            "interval=100, stores=621-738, exec_out=nil, linear=738-742"
        );
    }

    #[test]
    fn production_without_live_part() {
        assert_eq!(
            plan(true, 621, 738, 742, 742),
            "interval=100, stores=621-700, exec_out=700-742, linear=nil"
        );
        assert_eq!(
            plan(true, 621, 738, 842, 842),
            "interval=100, stores=621-800, exec_out=700-842, linear=nil"
        );
    }

    #[test]
    fn production_with_live_part() {
        assert_eq!(
            plan(true, 621, 621, 942, 998),
            "interval=100, stores=621-942, exec_out=621-942, linear=942-998"
        );
    }

    #[test]
    fn nothing_to_build_before_initial_block() {
        let plan = RequestPlan::build(false, 100, 500, 500, 500, 600);
        assert!(plan.is_linear_only());
        assert_eq!(plan.linear_pipeline, Some(BlockRange::new(500, 600)));
        assert_eq!(plan.required_end(), 0);
    }
}
