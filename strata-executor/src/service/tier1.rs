//! Tier-1: serve a client stream.
//!
//! A request is planned into a background part, built by segment jobs, and
//! a live part. Cached outputs of the background part are replayed from
//! their files, then the live pipeline takes over at the linear handoff.

use super::client::Tier2Client;
use super::request::{BlocksRequest, ProcessRangeRequest};
use super::source::BlockSource;
use crate::config::RuntimeConfig;
use crate::manifest::{Module, OutputGraph};
use crate::metrics::Metrics;
use crate::orchestrator::{
    fingerprint, BackFillerConfig, FailureRecorder, FailureRecorderConfig, LiveBackFiller,
    Orchestrator, PoolConfig, ProgressReporter, SegmentRunner, WorkerPool,
};
use crate::pipeline::{build_executors, PipelineBuilder, PipelineOptions, ResponseSender};
use crate::plan::{compute_stages, RequestPlan};
use crate::wasm::WasmRuntime;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use strata_core::block::{is_boundary, previous_boundary, BlockRange, Segmenter};
use strata_core::error::{Result, StrataError};
use strata_core::execout::FileWalker;
use strata_core::pb::{response, BlockScopedData, Clock, MapModuleOutput, Response, SessionInit};
use strata_core::storage::ObjectStore;
use strata_core::store::StoreMap;
use strata_core::types::{Cursor, ForkStep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, field, info, instrument, warn, Span};

/// Resolved block boundaries of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Boundaries {
    start: u64,
    handoff: u64,
    stop: Option<u64>,
}

/// Serves client requests.
#[derive(Debug)]
pub struct Tier1Service {
    runtime: Arc<WasmRuntime>,
    base: Arc<dyn ObjectStore>,
    source: Arc<dyn BlockSource>,
    client: Arc<dyn Tier2Client>,
    config: RuntimeConfig,
    block_type: String,
    failures: Arc<FailureRecorder>,
    metrics: Option<Arc<Metrics>>,
}

impl Tier1Service {
    pub fn new(
        runtime: Arc<WasmRuntime>,
        base: Arc<dyn ObjectStore>,
        source: Arc<dyn BlockSource>,
        client: Arc<dyn Tier2Client>,
        config: RuntimeConfig,
        block_type: impl Into<String>,
    ) -> Self {
        let failures = Arc::new(FailureRecorder::new(FailureRecorderConfig::from(&config)));
        Self {
            runtime,
            base,
            source,
            client,
            config,
            block_type: block_type.into(),
            failures,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Share a failure recorder across services.
    pub fn with_failure_recorder(mut self, failures: Arc<FailureRecorder>) -> Self {
        self.failures = failures;
        self
    }

    /// The failure recorder.
    pub fn failures(&self) -> &Arc<FailureRecorder> {
        &self.failures
    }

    /// Serve `request`, streaming responses on `sender` until the stop block
    /// or until `cancel` fires.
    #[instrument(
        name = "request",
        skip_all,
        fields(
            tier = "tier1",
            request_id = field::Empty,
            output = %request.output_module,
            start = request.start_block,
            stop = request.stop_block,
        )
    )]
    pub async fn blocks(
        &self,
        request: BlocksRequest,
        sender: ResponseSender,
        cancel: CancellationToken,
    ) -> Result<()> {
        let _active = self.metrics.as_ref().map(|m| m.request_started("tier1"));

        request.validate()?;
        let graph = OutputGraph::new(&request.package, &request.output_module, request.production_mode)?;
        validate_graph(&request, &graph)?;

        let start = match &request.start_cursor {
            Some(cursor) => cursor.parse::<Cursor>()?.resume_block(),
            None => request.start_block,
        };
        graph.validate_start_block(start)?;

        let modules_hash = graph
            .module_hash(&request.output_module)
            .unwrap_or_default()
            .to_string();
        let fingerprint = fingerprint(&request.identity, &modules_hash, &request.output_module);
        if let Some(short_circuit) = self.failures.check(&fingerprint, start, request.production_mode) {
            warn!(
                fingerprint,
                backoff_ms = short_circuit.backoff.as_millis() as u64,
                "short-circuiting previously failed request"
            );
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(short_circuit.backoff) => {}
            }
            return Err(short_circuit.error);
        }

        let request_id = trace_id(&request, start);
        Span::current().record("request_id", request_id.as_str());
        let result = self.serve(&request, &graph, start, &request_id, &sender, &cancel).await;
        match &result {
            Ok(()) => self.failures.record_success(&fingerprint),
            Err(err) if err.is_module_fault() => {
                self.failures
                    .record_failure(&fingerprint, err.failed_block().unwrap_or(start), err);
            }
            Err(err) => debug!(error = %err, "request failed"),
        }
        result
    }

    async fn serve(
        &self,
        request: &BlocksRequest,
        graph: &OutputGraph,
        start: u64,
        request_id: &str,
        sender: &ResponseSender,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let interval = self.config.segment_size;
        let head = self.source.final_head().await?;
        let bounds = resolve_boundaries(request, graph, start, head, interval);
        let plan = RequestPlan::build(
            request.production_mode,
            interval,
            graph.lowest_initial_block(),
            bounds.start,
            bounds.handoff,
            bounds.stop.unwrap_or(u64::MAX),
        );
        info!(head, handoff = bounds.handoff, plan = %plan, "request planned");

        send(
            sender,
            response::Message::Session(SessionInit {
                trace_id: request_id.to_string(),
                resolved_start_block: bounds.start,
                linear_handoff_block: bounds.handoff,
                max_parallel_workers: self.config.parallel_workers as u64,
            }),
        )
        .await?;

        let stages = compute_stages(graph.schedulable_modules())?;
        let template = ProcessRangeRequest {
            package: request.package.clone(),
            output_module: request.output_module.clone(),
            segment_size: interval,
            first_streamable_block: self.source.first_streamable_block(),
            block_type: self.block_type.clone(),
            production_mode: request.production_mode,
            ..ProcessRangeRequest::default()
        };
        let mut pool = WorkerPool::new(
            Arc::clone(&self.client),
            PoolConfig::from(&self.config),
            cancel.child_token(),
        );
        if let Some(metrics) = &self.metrics {
            pool = pool.with_metrics(Arc::clone(metrics));
        }
        let orchestrator = Arc::new(Orchestrator::new(
            pool,
            graph,
            stages.clone(),
            &self.base,
            self.config.store_limits,
            template,
        )?);

        let mut stores_boundary = None;
        if !plan.is_linear_only() && !stages.is_empty() {
            let mut progress = ProgressReporter::new(Some(sender.clone()), &stages);
            stores_boundary = orchestrator.run(&plan, &mut progress).await?;
        }

        if let Some(range) = plan.write_exec_out {
            self.replay_outputs(graph, range, bounds.start, sender, cancel).await?;
        }

        if let Some(linear) = plan.linear_pipeline {
            let linear_start = stores_boundary.unwrap_or(linear.start).min(linear.start);
            let backfiller = (!stages.is_empty() && is_boundary(linear_start, interval)).then(|| {
                let runner: Arc<dyn SegmentRunner> = orchestrator.clone();
                LiveBackFiller::new(runner, BackFillerConfig::from_runtime(&self.config), linear_start)
            });
            self.run_linear(request, graph, linear_start, bounds, sender, cancel, backfiller)
                .await?;
        }
        Ok(())
    }

    /// Send the cached outputs of `range` from `start` on.
    async fn replay_outputs(
        &self,
        graph: &OutputGraph,
        range: BlockRange,
        start: u64,
        sender: &ResponseSender,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let output = graph.output_module_name();
        let config = graph.exec_out_config(output, &self.base)?;
        let walk_start = range.start.max(config.initial_block());
        let mut walker = FileWalker::new(config, Segmenter::new(self.config.segment_size, walk_start, range.exclusive_end));

        while let Some(file) = walker.next().await? {
            if cancel.is_cancelled() {
                return Err(canceled());
            }
            debug!(range = %file.range(), items = file.len(), "replaying output file");
            for item in file.sorted_items() {
                if item.block_num < start {
                    continue;
                }
                let clock = Clock {
                    id: item.block_id.clone(),
                    number: item.block_num,
                    timestamp: item.timestamp.clone(),
                };
                let data = BlockScopedData {
                    output: (!item.is_skipped).then(|| MapModuleOutput {
                        name: output.to_string(),
                        payload: item.payload.clone(),
                        cached: true,
                    }),
                    cursor: Cursor::new(ForkStep::Final, &clock).to_string(),
                    final_block_height: item.block_num,
                    clock: Some(clock),
                    ..Default::default()
                };
                send(sender, response::Message::BlockScopedData(data)).await?;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_linear(
        &self,
        request: &BlocksRequest,
        graph: &OutputGraph,
        linear_start: u64,
        bounds: Boundaries,
        sender: &ResponseSender,
        cancel: &CancellationToken,
        mut backfiller: Option<LiveBackFiller>,
    ) -> Result<()> {
        let mut stores = StoreMap::new();
        for store in graph.stores() {
            let config = graph.store_config(&store.name, &self.base, self.config.store_limits)?;
            let mut full = config.new_full_kv();
            if linear_start > config.initial_block() {
                full.load(linear_start).await?;
            }
            stores.insert(full);
        }

        let modules: Vec<&Module> = graph.used_modules().iter().collect();
        let executors = build_executors(&modules, graph, &request.package, &self.runtime, &stores)?;
        let options = PipelineOptions::new(self.block_type.clone(), request.output_module.clone(), self.config.segment_size)
            .with_debug_outputs(!request.production_mode)
            .with_tier("tier1");
        let mut builder = PipelineBuilder::new(Arc::clone(&self.runtime), options)
            .with_stores(stores)
            .with_executors(executors)
            .with_initial_snapshots(&request.debug_initial_store_snapshot_for_modules)
            .with_gate(bounds.start.max(bounds.handoff))
            .with_responses(sender.clone());
        if let Some(metrics) = &self.metrics {
            builder = builder.with_metrics(Arc::clone(metrics));
        }
        let mut pipeline = builder.build()?;

        info!(linear_start, gate = pipeline.gate().start_block(), "starting linear pipeline");
        let mut events = self.source.stream(linear_start, bounds.stop).await?;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    if let Some(backfiller) = backfiller.as_mut() {
                        backfiller.shutdown();
                    }
                    return Err(canceled());
                }
                next = events.next() => next,
            };
            let Some(event) = next else {
                break;
            };
            let event = event?;
            let block_num = event.block.number();
            if bounds.stop.is_some_and(|stop| block_num >= stop) {
                break;
            }
            let is_final = event.step == ForkStep::Final;
            pipeline.process_event(event).await?;
            if is_final {
                if let Some(backfiller) = backfiller.as_mut() {
                    backfiller.on_final(block_num).await;
                }
            }
        }

        if let Some(backfiller) = backfiller.as_mut() {
            backfiller.flush().await;
        }
        debug!(reversible = pipeline.reversible_blocks(), "linear pipeline done");
        Ok(())
    }
}

/// Output module must be a map; debug snapshots must name used stores.
fn validate_graph(request: &BlocksRequest, graph: &OutputGraph) -> Result<()> {
    let output = graph.output_module();
    if !output.kind.is_map() {
        return Err(StrataError::OutputNotMapper {
            module: output.name.clone(),
            kind: output.kind.as_str().to_string(),
        });
    }
    for name in &request.debug_initial_store_snapshot_for_modules {
        if !graph.stores().iter().any(|m| &m.name == name) {
            return Err(StrataError::InvalidRequest {
                cause: format!("debug snapshot requested for '{name}', which is not a store of the request"),
            });
        }
    }
    Ok(())
}

/// Linear handoff: the start block in development mode; in production mode
/// the stop block when it is already final, otherwise the last boundary
/// at or before the final head.
fn resolve_boundaries(request: &BlocksRequest, graph: &OutputGraph, start: u64, head: u64, interval: u64) -> Boundaries {
    let stop = request.stop();
    let handoff = if !request.production_mode {
        start
    } else {
        match stop {
            Some(stop) if stop <= head => stop,
            _ => previous_boundary(head, interval).max(graph.lowest_initial_block()),
        }
    };
    Boundaries {
        start,
        handoff,
        stop,
    }
}

/// Id of one request, sent in the session message and logged as
/// `request_id`.
fn trace_id(request: &BlocksRequest, start: u64) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(request.identity.as_bytes());
    hasher.update(request.output_module.as_bytes());
    hasher.update(start.to_be_bytes());
    hasher.update(nanos.to_be_bytes());
    hex::encode(&hasher.finalize()[..16])
}

fn canceled() -> StrataError {
    StrataError::Canceled {
        cause: "request canceled by the client".to_string(),
    }
}

async fn send(sender: &ResponseSender, message: response::Message) -> Result<()> {
    sender
        .send(Response {
            message: Some(message),
        })
        .await
        .map_err(|_| StrataError::StreamClosed {
            cause: "response receiver dropped".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{Binary, Input, Package};
    use strata_core::store::{UpdatePolicy, ValueType};

    fn package() -> Package {
        Package::new()
            .with_binary(Binary::wasm(b"\0asm".to_vec()))
            .with_module(Module::map("map_a").with_input(Input::source("block")).with_initial_block(621))
            .with_module(
                Module::store("store_a", UpdatePolicy::Set, ValueType::String)
                    .with_input(Input::map("map_a"))
                    .with_initial_block(621),
            )
            .with_module(Module::map("out").with_input(Input::store_get("store_a")).with_initial_block(621))
    }

    #[test]
    fn development_hands_off_at_start() {
        let request = BlocksRequest::new(package(), "out", 738, 0);
        let graph = OutputGraph::new(&request.package, "out", false).unwrap();
        let bounds = resolve_boundaries(&request, &graph, 738, 10_000, 100);
        assert_eq!(bounds.handoff, 738);
        assert_eq!(bounds.stop, None);
    }

    #[test]
    fn production_hands_off_at_final_stop_or_boundary() {
        let request = BlocksRequest::new(package(), "out", 738, 842).with_production_mode(true);
        let graph = OutputGraph::new(&request.package, "out", true).unwrap();
        assert_eq!(resolve_boundaries(&request, &graph, 738, 10_000, 100).handoff, 842);
        assert_eq!(resolve_boundaries(&request, &graph, 738, 820, 100).handoff, 800);
    }

    #[test]
    fn store_output_is_rejected() {
        let request = BlocksRequest::new(package(), "store_a", 738, 0);
        let graph = OutputGraph::new(&request.package, "store_a", false).unwrap();
        assert_eq!(validate_graph(&request, &graph).unwrap_err().code(), "E103");
    }

    #[test]
    fn debug_snapshot_of_unknown_store_is_rejected() {
        let request = BlocksRequest::new(package(), "out", 738, 0).with_debug_snapshots(vec!["map_a".into()]);
        let graph = OutputGraph::new(&request.package, "out", false).unwrap();
        assert_eq!(validate_graph(&request, &graph).unwrap_err().code(), "E101");
    }

    #[test]
    fn failure_block_is_taken_from_module_faults() {
        let err = StrataError::ModuleExecution {
            module: "out".into(),
            block: 700,
            cause: "boom".into(),
        };
        assert_eq!(err.failed_block(), Some(700));
        assert_eq!(canceled().failed_block(), None);
    }
}
