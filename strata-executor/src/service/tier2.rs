//! Tier-2: execute one stage over one segment and persist its artifacts.

use super::request::ProcessRangeRequest;
use super::source::BlockSource;
use crate::config::RuntimeConfig;
use crate::manifest::OutputGraph;
use crate::metrics::Metrics;
use crate::pipeline::{build_executors, OutputCache, Pipeline, PipelineBuilder, PipelineOptions};
use crate::plan::{compute_stages, ExecutionStages};
use crate::wasm::WasmRuntime;
use futures::StreamExt;
use std::sync::Arc;
use strata_core::block::BlockRange;
use strata_core::error::{Result, StrataError};
use strata_core::execout::ExecOutputWriter;
use strata_core::index::IndexWriter;
use strata_core::pb::{
    process_range_response, Completed, Failed, ModulesProgress, PbBlockRange, ProcessRangeResponse,
};
use strata_core::storage::{MeteredStore, ObjectStore};
use strata_core::store::StoreMap;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Blocks between two progress messages.
const PROGRESS_INTERVAL: u64 = 100;

/// Logs kept from a failed job.
#[derive(Debug, Default)]
struct FailureLogs {
    lines: Vec<String>,
    truncated: bool,
}

/// Executes segment jobs for Tier-1.
#[derive(Debug)]
pub struct Tier2Service {
    runtime: Arc<WasmRuntime>,
    base: Arc<dyn ObjectStore>,
    source: Arc<dyn BlockSource>,
    config: RuntimeConfig,
    metrics: Option<Arc<Metrics>>,
}

impl Tier2Service {
    pub fn new(
        runtime: Arc<WasmRuntime>,
        base: Arc<dyn ObjectStore>,
        source: Arc<dyn BlockSource>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            runtime,
            base,
            source,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run `request`, streaming progress then `Completed` or `Failed` on
    /// `sender`.
    ///
    /// Stores of earlier stages are loaded from their full snapshot at the
    /// segment start. Stores of the requested stage start empty: as full
    /// stores when the segment holds their initial block, as partial stores
    /// otherwise. Outputs and index keys of the stage are written as files.
    #[instrument(
        name = "segment",
        skip_all,
        fields(tier = "tier2", stage = request.stage, segment = request.segment_number)
    )]
    pub async fn process_range(
        &self,
        request: ProcessRangeRequest,
        sender: mpsc::Sender<ProcessRangeResponse>,
    ) -> Result<()> {
        let _active = self.metrics.as_ref().map(|m| m.request_started("tier2"));
        let metered = MeteredStore::new(Arc::clone(&self.base));
        let meter = metered.meter();
        let base: Arc<dyn ObjectStore> = Arc::new(metered);

        let mut logs = FailureLogs::default();
        let result = self.execute(&request, &base, &sender, &mut logs).await;

        if let Some(metrics) = &self.metrics {
            metrics.record_storage_bytes(meter.bytes_read(), meter.bytes_written());
        }

        match result {
            Ok(range) => {
                info!(range = %range, "segment processed");
                let completed = Completed {
                    processed_ranges: vec![PbBlockRange {
                        start_block: range.start,
                        end_block: range.exclusive_end,
                    }],
                };
                send(&sender, process_range_response::Type::Completed(completed)).await;
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "segment failed");
                let failed = Failed {
                    reason: err.to_string(),
                    logs: logs.lines,
                    logs_truncated: logs.truncated,
                    code: err.code().to_string(),
                    failed_block: err.failed_block(),
                };
                send(&sender, process_range_response::Type::Failed(failed)).await;
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        request: &ProcessRangeRequest,
        base: &Arc<dyn ObjectStore>,
        sender: &mpsc::Sender<ProcessRangeResponse>,
        logs: &mut FailureLogs,
    ) -> Result<BlockRange> {
        let graph = OutputGraph::new(&request.package, &request.output_module, request.production_mode)?;
        let stages = compute_stages(graph.schedulable_modules())?;
        if request.stage >= stages.len() {
            return Err(StrataError::InvalidRequest {
                cause: format!(
                    "stage {} out of range, the request has {} stages",
                    request.stage,
                    stages.len()
                ),
            });
        }
        let range = request.range(graph.lowest_initial_block())?;
        request.validate(range)?;
        debug!(range = %range, stages = %stages, "processing segment");

        let mut pipeline = self.build_pipeline(request, &graph, &stages, range, base).await?;

        let mut blocks = self.source.final_blocks(range).await?;
        let mut processed = 0u64;
        while let Some(block) = blocks.next().await {
            let block = block?;
            if let Err(err) = pipeline.process_new_final(block).await {
                logs.lines = pipeline.logs().to_vec();
                logs.truncated = pipeline.logs_truncated();
                return Err(err);
            }
            processed += 1;
            if processed % PROGRESS_INTERVAL == 0 {
                send_progress(sender, &pipeline).await;
            }
        }

        pipeline.end_of_stream(range.exclusive_end).await?;
        debug!(snapshots = pipeline.written_snapshots().len(), "segment artifacts written");
        send_progress(sender, &pipeline).await;
        Ok(range)
    }

    async fn build_pipeline(
        &self,
        request: &ProcessRangeRequest,
        graph: &OutputGraph,
        stages: &ExecutionStages,
        range: BlockRange,
        base: &Arc<dyn ObjectStore>,
    ) -> Result<Pipeline> {
        let stage = request.stage;
        let interval = request.segment_size;
        let limits = self.config.store_limits;

        let mut stores = StoreMap::new();
        let mut snapshotted = Vec::new();
        for store in stages.modules_through(stage).into_iter().filter(|m| m.kind.is_store()) {
            let config = graph.store_config(&store.name, base, limits)?;
            let store_stage = stages.stage_of(&store.name).unwrap_or(stage);
            if store_stage < stage {
                let mut full = config.new_full_kv();
                if range.start > config.initial_block() {
                    full.load(range.start).await?;
                }
                stores.insert(full);
            } else {
                if config.initial_block() < range.exclusive_end {
                    snapshotted.push(store.name.clone());
                }
                if range.start <= config.initial_block() {
                    stores.insert(config.new_full_kv());
                } else {
                    stores.insert(config.new_partial_kv(range.start));
                }
            }
        }

        let modules = stages.modules_through(stage);
        let mut executors = build_executors(&modules, graph, &request.package, &self.runtime, &stores)?;

        for executor in executors.iter_mut() {
            let Some(index_module) = executor.filter_module().map(str::to_string) else {
                continue;
            };
            if stages.stage_of(&index_module).map_or(true, |s| s >= stage) {
                continue;
            }
            let mut file = graph.index_file(&index_module, range, base)?;
            if file.load().await? {
                debug!(module = %executor.name(), index = %index_module, "using precomputed block index");
                executor.precompute_filter(file.indices());
            }
        }

        let mut cache = OutputCache::new(interval, range.exclusive_end);
        for earlier in 0..stage {
            for module in stages.modules_of(earlier).into_iter().filter(|m| !m.kind.is_store()) {
                cache = cache.with_module(graph.exec_out_config(&module.name, base)?);
            }
        }

        let mut out_configs = Vec::new();
        let mut index_writers = Vec::new();
        for module in stages.modules_of(stage).into_iter().filter(|m| !m.kind.is_store()) {
            out_configs.push(graph.exec_out_config(&module.name, base)?);
            if module.kind.is_index() {
                index_writers.push(IndexWriter::new(graph.index_file(&module.name, range, base)?));
            }
        }
        let writer = ExecOutputWriter::new(&out_configs, range.start, range.exclusive_end, interval);

        let options = PipelineOptions::new(request.block_type.clone(), request.output_module.clone(), interval)
            .with_tier("tier2");
        let mut builder = PipelineBuilder::new(Arc::clone(&self.runtime), options)
            .with_stores(stores)
            .with_executors(executors)
            .with_cache(cache)
            .with_exec_out_writer(writer)
            .with_snapshots(snapshotted, range.start);
        for index_writer in index_writers {
            builder = builder.with_index_writer(index_writer);
        }
        if let Some(metrics) = &self.metrics {
            builder = builder.with_metrics(Arc::clone(metrics));
        }
        builder.build()
    }
}

async fn send(sender: &mpsc::Sender<ProcessRangeResponse>, kind: process_range_response::Type) {
    let response = ProcessRangeResponse { r#type: Some(kind) };
    if sender.send(response).await.is_err() {
        debug!("tier2 response receiver dropped");
    }
}

async fn send_progress(sender: &mpsc::Sender<ProcessRangeResponse>, pipeline: &Pipeline) {
    let progress = ModulesProgress {
        stages: Vec::new(),
        modules: pipeline.module_progress(),
    };
    send(sender, process_range_response::Type::Progress(progress)).await;
}
