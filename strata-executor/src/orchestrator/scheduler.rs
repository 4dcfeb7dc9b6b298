//! Stage-by-stage scheduling of segment jobs.

use super::backfiller::SegmentRunner;
use super::job::Job;
use super::pool::WorkerPool;
use super::progress::ProgressReporter;
use super::squasher::{squash, StoreFiles};
use crate::manifest::OutputGraph;
use crate::plan::{ExecutionStages, RequestPlan};
use crate::service::ProcessRangeRequest;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use strata_core::block::{previous_boundary, BlockRange, Segmenter};
use strata_core::error::{Result, StrataError};
use strata_core::execout::ExecOutputConfig;
use strata_core::storage::ObjectStore;
use strata_core::store::{StoreConfig, StoreLimits};
use tracing::{debug, info, instrument};

/// Builds the background artifacts of one request.
///
/// Stages run one after the other: the jobs of stage `k` read the full
/// snapshots of the stores of earlier stages, so those are squashed before
/// stage `k` is dispatched.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    pool: WorkerPool,
    stages: ExecutionStages,
    interval: u64,
    graph_initial_block: u64,
    stores: Vec<(usize, Arc<StoreConfig>)>,
    output: Option<(usize, Arc<ExecOutputConfig>)>,
    template: ProcessRangeRequest,
}

impl Orchestrator {
    /// Orchestrator for the schedulable modules of `graph`, split in
    /// `stages`. `template` holds the request fields shared by every job.
    pub fn new(
        pool: WorkerPool,
        graph: &OutputGraph,
        stages: ExecutionStages,
        base: &Arc<dyn ObjectStore>,
        limits: StoreLimits,
        template: ProcessRangeRequest,
    ) -> Result<Self> {
        if template.segment_size == 0 {
            return Err(StrataError::InvalidRequest {
                cause: "segment size must be positive".to_string(),
            });
        }

        let mut stores = Vec::new();
        for index in 0..stages.len() {
            for store in stages.stores_of(index) {
                stores.push((index, graph.store_config(&store.name, base, limits)?));
            }
        }

        let output_name = graph.output_module_name();
        let output = match stages.stage_of(output_name) {
            Some(index) if !graph.output_module().kind.is_store() => {
                Some((index, graph.exec_out_config(output_name, base)?))
            }
            _ => None,
        };

        Ok(Self {
            pool,
            interval: template.segment_size,
            graph_initial_block: graph.lowest_initial_block(),
            stages,
            stores,
            output,
            template,
        })
    }

    /// Execution stages.
    pub fn stages(&self) -> &ExecutionStages {
        &self.stages
    }

    /// Block at which store state is handed to the live pipeline for
    /// `plan`: the last boundary at or before the end of `build_stores`.
    pub fn stores_boundary(&self, plan: &RequestPlan) -> Option<u64> {
        plan.build_stores.map(|range| {
            previous_boundary(range.exclusive_end, self.interval).max(self.graph_initial_block)
        })
    }

    /// Produce every missing store snapshot and output file of `plan`.
    ///
    /// Returns the block at which full store snapshots are available, i.e.
    /// where the live pipeline starts.
    #[instrument(skip_all, fields(plan = %plan))]
    pub async fn run(&self, plan: &RequestPlan, progress: &mut ProgressReporter) -> Result<Option<u64>> {
        let stores_end = self.stores_boundary(plan);
        let mut template = self.template.clone();
        template.stop_block = plan.required_end();

        for stage in 0..self.stages.len() {
            let mut segments: BTreeSet<u64> = BTreeSet::new();

            if let Some(end) = stores_end {
                for (_, config) in self.stores_of(stage) {
                    let files = StoreFiles::scan(Arc::clone(config)).await?;
                    for (segment, range) in files.missing_segments(self.interval, end) {
                        debug!(store = %config.name(), segment, range = %range, "missing store segment");
                        segments.insert(segment);
                    }
                }
            }

            if let (Some((output_stage, config)), Some(range)) = (&self.output, plan.write_exec_out) {
                if *output_stage == stage {
                    for segment in self.missing_outputs(config, range).await? {
                        segments.insert(segment);
                    }
                }
            }

            let segmenter = Segmenter::new(self.interval, self.graph_initial_block, template.stop_block);
            let modules = self.stages.names_of(stage);
            let jobs: Vec<Job> = segments
                .iter()
                .filter_map(|&segment| {
                    segmenter
                        .range(segment)
                        .map(|range| Job::new(stage, segment, range, modules.clone()))
                })
                .collect();

            info!(stage, jobs = jobs.len(), "running stage");
            self.pool.run(jobs, &template, progress).await?;

            if let Some(end) = stores_end {
                self.squash_stage(stage, end).await?;
            }
        }

        Ok(stores_end)
    }

    /// Produce segment `segment` of every stage and squash the stores up to
    /// its end. Used to extend the cache behind a live stream.
    #[instrument(skip(self))]
    pub async fn run_segment(&self, segment: u64) -> Result<()> {
        let mut template = self.template.clone();
        template.stop_block = 0;
        let segmenter = Segmenter::new(self.interval, self.graph_initial_block, u64::MAX);
        let Some(range) = segmenter.range(segment) else {
            return Ok(());
        };

        let mut progress = ProgressReporter::new(None, &self.stages);
        for stage in 0..self.stages.len() {
            let job = Job::new(stage, segment, range, self.stages.names_of(stage));
            self.pool.run(vec![job], &template, &mut progress).await?;
            self.squash_stage(stage, range.exclusive_end).await?;
        }
        Ok(())
    }

    fn stores_of(&self, stage: usize) -> impl Iterator<Item = &(usize, Arc<StoreConfig>)> {
        self.stores.iter().filter(move |(index, _)| *index == stage)
    }

    async fn squash_stage(&self, stage: usize, end: u64) -> Result<()> {
        for (_, config) in self.stores_of(stage) {
            let files = StoreFiles::scan(Arc::clone(config)).await?;
            squash(&files, self.interval, end).await?;
        }
        Ok(())
    }

    /// Segments of `range` whose output file is missing.
    async fn missing_outputs(&self, config: &ExecOutputConfig, range: BlockRange) -> Result<Vec<u64>> {
        let existing = config.list_existing_files().await?;
        let start = range.start.max(config.initial_block());
        let segmenter = Segmenter::new(self.interval, start, range.exclusive_end);
        Ok(segmenter
            .segments()
            .filter(|(_, file_range)| !existing.contains(file_range))
            .map(|(segment, _)| segment)
            .collect())
    }
}

#[async_trait]
impl SegmentRunner for Orchestrator {
    async fn run_segment(&self, segment: u64) -> Result<()> {
        Orchestrator::run_segment(self, segment).await
    }
}
