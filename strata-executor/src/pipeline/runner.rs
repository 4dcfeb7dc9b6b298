//! The per-block pipeline.

use super::cache::OutputCache;
use super::executor::{ModuleExecutor, ModuleOutput};
use super::fork::{ForkHandler, ReversibleBlock};
use super::gate::OutputGate;
use crate::manifest::{Module, OutputGraph, Package};
use crate::metrics::Metrics;
use crate::wasm::WasmRuntime;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use strata_core::block::next_boundary;
use strata_core::error::{Result, StrataError};
use strata_core::execout::{ExecOutputBuffer, ExecOutputWriter};
use strata_core::index::IndexWriter;
use strata_core::pb::store_delta::Operation;
use strata_core::pb::{
    response, BlockScopedData, BlockUndoSignal, Clock, MapModuleOutput, ModuleProgress, Response,
    StoreDelta, StoreModuleOutput,
};
use strata_core::store::{FileInfo, StoreMap};
use strata_core::types::{Block, BlockEvent, Cursor, ForkStep};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, trace};

/// Channel carrying responses to the client. Bounded: a slow client makes
/// the pipeline wait.
pub type ResponseSender = mpsc::Sender<Response>;

/// Static settings of a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Name under which the block payload is exposed to modules.
    pub block_type: String,
    /// Module whose output is streamed.
    pub output_module: String,
    /// Segment size.
    pub segment_interval: u64,
    /// Stream the outputs of every module, not only the output module.
    pub debug_outputs: bool,
    /// Label used in metrics, `tier1` or `tier2`.
    pub tier: &'static str,
}

impl PipelineOptions {
    /// Options streaming `output_module` of blocks exposed as `block_type`.
    pub fn new(block_type: impl Into<String>, output_module: impl Into<String>, segment_interval: u64) -> Self {
        Self {
            block_type: block_type.into(),
            output_module: output_module.into(),
            segment_interval,
            debug_outputs: false,
            tier: "tier1",
        }
    }

    /// Stream every module output.
    pub fn with_debug_outputs(mut self, enabled: bool) -> Self {
        self.debug_outputs = enabled;
        self
    }

    /// Metrics label.
    pub fn with_tier(mut self, tier: &'static str) -> Self {
        self.tier = tier;
        self
    }
}

/// Stores saved at segment boundaries.
#[derive(Debug)]
struct StoreSnapshots {
    stores: Vec<String>,
    next_boundary: u64,
    last_saved: u64,
    interval: u64,
    written: Vec<(String, FileInfo)>,
}

/// Runs the modules of a request on every block of a stream.
pub struct Pipeline {
    options: PipelineOptions,
    runtime: Arc<WasmRuntime>,
    executors: Vec<ModuleExecutor>,
    stores: StoreMap,
    cache: OutputCache,
    exec_out: Option<ExecOutputWriter>,
    index_writers: BTreeMap<String, IndexWriter>,
    snapshots: Option<StoreSnapshots>,
    fork: ForkHandler,
    gate: OutputGate,
    responses: Option<ResponseSender>,
    metrics: Option<Arc<Metrics>>,
    progress: BTreeMap<String, ModuleProgress>,
    initial_snapshots: Vec<StoreModuleOutput>,
    logs: Vec<String>,
    logs_truncated: bool,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("options", &self.options)
            .field("modules", &self.executors.iter().map(|e| e.name()).collect::<Vec<_>>())
            .field("stores", &self.stores.len())
            .field("reversible", &self.fork.len())
            .finish()
    }
}

impl Pipeline {
    /// Stores of the pipeline.
    pub fn stores(&self) -> &StoreMap {
        &self.stores
    }

    /// Executors in plan order.
    pub fn executors(&self) -> &[ModuleExecutor] {
        &self.executors
    }

    /// The output gate.
    pub fn gate(&self) -> &OutputGate {
        &self.gate
    }

    /// Number of reversible blocks held.
    pub fn reversible_blocks(&self) -> usize {
        self.fork.len()
    }

    /// Store files written at segment boundaries so far.
    pub fn written_snapshots(&self) -> &[(String, FileInfo)] {
        self.snapshots.as_ref().map(|s| s.written.as_slice()).unwrap_or_default()
    }

    /// Executed, cached and skipped block counts per module.
    pub fn module_progress(&self) -> Vec<ModuleProgress> {
        self.progress.values().cloned().collect()
    }

    /// Guest log lines of the current block.
    pub fn logs(&self) -> &[String] {
        &self.logs
    }

    /// Whether guest log lines of the current block were dropped.
    pub fn logs_truncated(&self) -> bool {
        self.logs_truncated
    }

    /// Process one event of the block source.
    pub async fn process_event(&mut self, event: BlockEvent) -> Result<()> {
        self.process_block(event.step, event.block).await
    }

    /// Process one block under `step`.
    ///
    /// `New` runs the modules and keeps the block reversible, `Undo` reverts
    /// it, and `Final` commits it. A `Final` for a block never seen as `New`
    /// is processed as new and final at once.
    pub async fn process_block(&mut self, step: ForkStep, block: Block) -> Result<()> {
        match step {
            ForkStep::New => self.handle_new(block, false).await,
            ForkStep::Undo => self.handle_undo(&block.clock).await,
            ForkStep::Final if self.fork.is_reversible(block.id()) => {
                self.handle_final(&block.clock).await
            }
            ForkStep::Final => self.process_new_final(block).await,
        }
    }

    /// Process a block that is final on arrival.
    pub async fn process_new_final(&mut self, block: Block) -> Result<()> {
        self.handle_new(block, true).await
    }

    #[instrument(skip(self, block), fields(block_num = block.number(), tier = self.options.tier))]
    async fn handle_new(&mut self, block: Block, is_final: bool) -> Result<()> {
        let block_num = block.number();
        if is_final {
            self.snapshot_until(block_num).await?;
            self.rotate_exec_out(block_num).await?;
        }
        self.cache.prepare(block_num).await?;

        let started = Instant::now();
        self.logs.clear();
        self.logs_truncated = false;

        let clock = Arc::new(block.clock.clone());
        let mut buffer = ExecOutputBuffer::new(&self.options.block_type, &block);
        let mut cached: HashSet<String> = HashSet::new();

        for executor in &self.executors {
            let name = executor.name();
            let progress = self.progress.entry(name.to_string()).or_insert_with(|| ModuleProgress {
                name: name.to_string(),
                ..Default::default()
            });

            if let Some(item) = self.cache.get(name, &clock) {
                trace!(module = %name, block_num, "output cache hit");
                if item.is_skipped {
                    buffer.set_skipped(name);
                } else {
                    executor.apply_cached(&item.payload)?;
                    buffer.set(name, item.payload.clone());
                }
                cached.insert(name.to_string());
                progress.cached_blocks += 1;
                record_module(&self.metrics, name, "cached");
                continue;
            }

            if !executor.runs_on_block(&buffer)? {
                buffer.set_skipped(name);
                progress.skipped_blocks += 1;
                record_module(&self.metrics, name, "skipped");
                continue;
            }

            let run = executor.run(&self.runtime, &buffer, &clock)?;
            self.logs.extend(run.logs);
            self.logs_truncated |= run.logs_truncated;
            if run.executed {
                progress.executed_blocks += 1;
                record_module(&self.metrics, name, "executed");
            } else {
                progress.skipped_blocks += 1;
                record_module(&self.metrics, name, "skipped");
            }
            buffer.set(name, run.output);
        }

        let store_deltas = self.take_store_deltas();
        let index_keys = self.index_keys(&buffer)?;

        if is_final {
            self.fork.mark_final(&clock);
        }
        if self.gate.should_send(block_num) {
            let mut data = self.block_scoped_data(&buffer, &cached, &store_deltas, is_final)?;
            if !self.initial_snapshots.is_empty() {
                let mut snapshots = std::mem::take(&mut self.initial_snapshots);
                snapshots.append(&mut data.debug_store_outputs);
                data.debug_store_outputs = snapshots;
            }
            self.send(response::Message::BlockScopedData(data)).await?;
        }

        if is_final {
            self.commit(&buffer, &index_keys);
        } else {
            self.fork.add_reversible(ReversibleBlock {
                clock: block.clock,
                buffer,
                store_deltas,
                index_keys,
            });
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_block(self.options.tier, started.elapsed().as_secs_f64());
        }
        Ok(())
    }

    async fn handle_undo(&mut self, clock: &Clock) -> Result<()> {
        let Some(undone) = self.fork.undo(clock, &self.stores) else {
            return Ok(());
        };
        debug!(block_num = clock.number, reverted = undone.reverted.len(), "undo processed");
        if !self.gate.should_send_undo(clock.number) {
            return Ok(());
        }
        let signal = BlockUndoSignal {
            last_valid_cursor: undone
                .last_valid
                .as_ref()
                .map(|c| Cursor::new(ForkStep::New, c).to_string())
                .unwrap_or_default(),
            last_valid_block: undone.last_valid.as_ref().map(Clock::block_ref),
        };
        self.send(response::Message::BlockUndoSignal(signal)).await
    }

    /// Finalize a block already processed as new.
    ///
    /// Stores are only saved on blocks that arrive final: a pipeline taking
    /// snapshots is fed final blocks only.
    async fn handle_final(&mut self, clock: &Clock) -> Result<()> {
        debug_assert!(
            self.snapshots.is_none(),
            "snapshotting pipelines only process final blocks"
        );
        self.rotate_exec_out(clock.number).await?;
        if let Some(block) = self.fork.finalize(clock) {
            self.commit(&block.buffer, &block.index_keys);
        }
        Ok(())
    }

    /// Record the outputs of a final block for persistence.
    fn commit(&mut self, buffer: &ExecOutputBuffer, index_keys: &[(String, Vec<String>)]) {
        if let Some(writer) = self.exec_out.as_mut() {
            writer.write(buffer);
        }
        let block_num = buffer.clock().number;
        for (module, keys) in index_keys {
            if let Some(writer) = self.index_writers.get_mut(module) {
                writer.write(keys, block_num);
            }
        }
    }

    /// Take the deltas of every store and clear them for the next block.
    fn take_store_deltas(&mut self) -> Vec<(String, Vec<StoreDelta>)> {
        let mut out = Vec::new();
        for executor in self.executors.iter().filter(|e| e.is_store()) {
            if let Some(store) = self.stores.get(executor.name()) {
                let mut store = store.lock();
                if !store.deltas().is_empty() {
                    out.push((executor.name().to_string(), store.deltas().to_vec()));
                }
                store.reset();
            }
        }
        out
    }

    fn index_keys(&self, buffer: &ExecOutputBuffer) -> Result<Vec<(String, Vec<String>)>> {
        let mut out = Vec::new();
        for executor in self.executors.iter().filter(|e| e.is_index()) {
            if let Some(bytes) = buffer.get(executor.name()) {
                out.push((executor.name().to_string(), executor.index_keys(bytes)?));
            }
        }
        Ok(out)
    }

    fn block_scoped_data(
        &self,
        buffer: &ExecOutputBuffer,
        cached: &HashSet<String>,
        store_deltas: &[(String, Vec<StoreDelta>)],
        is_final: bool,
    ) -> Result<BlockScopedData> {
        let clock = buffer.clock();
        let output_name = self.options.output_module.as_str();
        let output = (!buffer.is_skipped(output_name)).then(|| MapModuleOutput {
            name: output_name.to_string(),
            payload: buffer.get(output_name).unwrap_or_default().to_vec(),
            cached: cached.contains(output_name),
        });

        let mut data = BlockScopedData {
            output,
            clock: Some(clock.clone()),
            cursor: Cursor::new(if is_final { ForkStep::Final } else { ForkStep::New }, clock)
                .to_string(),
            final_block_height: self.fork.last_final().map(|c| c.number).unwrap_or_default(),
            ..Default::default()
        };

        if self.options.debug_outputs {
            for executor in &self.executors {
                let name = executor.name();
                if name == output_name || buffer.is_skipped(name) {
                    continue;
                }
                if executor.is_store() {
                    let deltas = store_deltas
                        .iter()
                        .find(|(store, _)| store == name)
                        .map(|(_, d)| d.clone())
                        .unwrap_or_default();
                    data.debug_store_outputs.push(StoreModuleOutput {
                        name: name.to_string(),
                        deltas,
                    });
                } else if let ModuleOutput::Map(out) = executor
                    .to_module_output(buffer.get(name).unwrap_or_default(), cached.contains(name))?
                {
                    data.debug_map_outputs.push(out);
                }
            }
        }
        Ok(data)
    }

    async fn send(&self, message: response::Message) -> Result<()> {
        let Some(sender) = &self.responses else {
            return Ok(());
        };
        sender
            .send(Response {
                message: Some(message),
            })
            .await
            .map_err(|_| StrataError::StreamClosed {
                cause: "response receiver dropped".to_string(),
            })
    }

    async fn rotate_exec_out(&mut self, block_num: u64) -> Result<()> {
        let Some(writer) = self.exec_out.as_mut() else {
            return Ok(());
        };
        for file in writer.maybe_rotate(block_num) {
            file.write().await?;
        }
        Ok(())
    }

    /// Save the snapshotted stores at every boundary up to `block_num`.
    async fn snapshot_until(&mut self, block_num: u64) -> Result<()> {
        loop {
            let boundary = match &self.snapshots {
                Some(s) if block_num >= s.next_boundary => s.next_boundary,
                _ => return Ok(()),
            };
            self.save_stores(boundary).await?;
        }
    }

    async fn save_stores(&mut self, boundary: u64) -> Result<()> {
        let Some(snapshots) = self.snapshots.as_mut() else {
            return Ok(());
        };
        let mut writers = Vec::with_capacity(snapshots.stores.len());
        for name in &snapshots.stores {
            let Some(handle) = self.stores.get(name) else {
                continue;
            };
            let mut store = handle.lock();
            let (file, writer) = store.save(boundary);
            if let Some(partial) = store.as_partial_mut() {
                partial.roll(boundary);
            }
            writers.push((name.clone(), file, writer));
        }

        for (name, file, writer) in writers {
            writer.write().await?;
            info!(store = %name, file = %file, "store snapshot written");
            snapshots.written.push((name, file));
        }
        snapshots.last_saved = boundary;
        snapshots.next_boundary = next_boundary(boundary, snapshots.interval);
        Ok(())
    }

    /// Flush everything at the end of the stream: stores are saved at
    /// `exclusive_end`, open exec-output files and index files are written.
    #[instrument(skip(self), fields(tier = self.options.tier))]
    pub async fn end_of_stream(&mut self, exclusive_end: u64) -> Result<()> {
        self.snapshot_until(exclusive_end).await?;
        if self
            .snapshots
            .as_ref()
            .is_some_and(|s| s.last_saved < exclusive_end)
        {
            self.save_stores(exclusive_end).await?;
        }

        if let Some(mut writer) = self.exec_out.take() {
            for file in writer.close() {
                file.write().await?;
            }
        }
        for (_, writer) in std::mem::take(&mut self.index_writers) {
            writer.close().await?;
        }
        debug!(exclusive_end, "end of stream flushed");
        Ok(())
    }
}

fn record_module(metrics: &Option<Arc<Metrics>>, module: &str, outcome: &str) {
    if let Some(metrics) = metrics {
        metrics.record_module(module, outcome);
    }
}

/// Build the executors of `modules`, in the given order.
pub fn build_executors(
    modules: &[&Module],
    graph: &OutputGraph,
    package: &Package,
    runtime: &WasmRuntime,
    stores: &StoreMap,
) -> Result<Vec<ModuleExecutor>> {
    modules
        .iter()
        .map(|module| {
            let binary = package.binary_of(module).ok_or_else(|| StrataError::InvalidRequest {
                cause: format!(
                    "module '{}' references missing binary {}",
                    module.name, module.binary_index
                ),
            })?;
            let hash = graph
                .module_hash(&module.name)
                .ok_or_else(|| StrataError::ModuleNotFound {
                    module: module.name.clone(),
                })?;
            let compiled = runtime.compile(&module.name, &binary.content)?;
            ModuleExecutor::new(module, hash, compiled, stores)
        })
        .collect()
}

/// Assembles a [`Pipeline`].
pub struct PipelineBuilder {
    options: PipelineOptions,
    runtime: Arc<WasmRuntime>,
    executors: Vec<ModuleExecutor>,
    stores: StoreMap,
    cache: Option<OutputCache>,
    exec_out: Option<ExecOutputWriter>,
    index_writers: Vec<IndexWriter>,
    snapshots: Option<(Vec<String>, u64)>,
    gate_start: u64,
    responses: Option<ResponseSender>,
    metrics: Option<Arc<Metrics>>,
    initial_snapshots: Vec<StoreModuleOutput>,
}

impl PipelineBuilder {
    /// Start building a pipeline.
    pub fn new(runtime: Arc<WasmRuntime>, options: PipelineOptions) -> Self {
        Self {
            options,
            runtime,
            executors: Vec::new(),
            stores: StoreMap::new(),
            cache: None,
            exec_out: None,
            index_writers: Vec::new(),
            snapshots: None,
            gate_start: 0,
            responses: None,
            metrics: None,
            initial_snapshots: Vec::new(),
        }
    }

    /// Set the stores. Executors must be built against the same map.
    pub fn with_stores(mut self, stores: StoreMap) -> Self {
        self.stores = stores;
        self
    }

    /// Set the executors, in plan order.
    pub fn with_executors(mut self, executors: Vec<ModuleExecutor>) -> Self {
        self.executors = executors;
        self
    }

    /// Read cached outputs.
    pub fn with_cache(mut self, cache: OutputCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Write the outputs of final blocks.
    pub fn with_exec_out_writer(mut self, writer: ExecOutputWriter) -> Self {
        self.exec_out = Some(writer);
        self
    }

    /// Write the keys of an index module when the stream ends.
    pub fn with_index_writer(mut self, writer: IndexWriter) -> Self {
        self.index_writers.push(writer);
        self
    }

    /// Save `stores` at every segment boundary after `start_block`.
    pub fn with_snapshots(mut self, stores: Vec<String>, start_block: u64) -> Self {
        self.snapshots = Some((stores, start_block));
        self
    }

    /// Only send outputs from `start_block` on.
    pub fn with_gate(mut self, start_block: u64) -> Self {
        self.gate_start = start_block;
        self
    }

    /// Send responses on `sender`.
    pub fn with_responses(mut self, sender: ResponseSender) -> Self {
        self.responses = Some(sender);
        self
    }

    /// Record into `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Send the content of `stores` as they are before the first block,
    /// along with the first block sent.
    pub fn with_initial_snapshots(mut self, stores: &[String]) -> Self {
        for name in stores {
            let Some(handle) = self.stores.get(name) else {
                continue;
            };
            let store = handle.lock();
            let mut keys: Vec<&String> = store.kv().keys().collect();
            keys.sort();
            let deltas = keys
                .into_iter()
                .map(|key| StoreDelta {
                    operation: Operation::Create as i32,
                    ordinal: 0,
                    key: key.clone(),
                    old_value: Vec::new(),
                    new_value: store.kv()[key].clone(),
                })
                .collect();
            self.initial_snapshots.push(StoreModuleOutput {
                name: name.clone(),
                deltas,
            });
        }
        self
    }

    /// Build the pipeline.
    pub fn build(self) -> Result<Pipeline> {
        let interval = self.options.segment_interval;
        if interval == 0 {
            return Err(StrataError::ConfigValue {
                field: "segment_interval".to_string(),
                cause: "must be greater than zero".to_string(),
            });
        }
        let streams_output = self.responses.is_some();
        if streams_output && !self.executors.iter().any(|e| e.name() == self.options.output_module) {
            return Err(StrataError::ModuleNotFound {
                module: self.options.output_module.clone(),
            });
        }

        let snapshots = self.snapshots.map(|(stores, start)| StoreSnapshots {
            stores,
            next_boundary: next_boundary(start, interval),
            last_saved: start,
            interval,
            written: Vec::new(),
        });

        Ok(Pipeline {
            cache: self.cache.unwrap_or_else(|| OutputCache::new(interval, u64::MAX)),
            index_writers: self
                .index_writers
                .into_iter()
                .map(|w| (w.module_name().to_string(), w))
                .collect(),
            gate: OutputGate::new(self.gate_start),
            fork: ForkHandler::new(),
            progress: BTreeMap::new(),
            initial_snapshots: self.initial_snapshots,
            logs: Vec::new(),
            logs_truncated: false,
            options: self.options,
            runtime: self.runtime,
            executors: self.executors,
            stores: self.stores,
            exec_out: self.exec_out,
            snapshots,
            responses: self.responses,
            metrics: self.metrics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{block, echo_package, fork_block, BLOCK_TYPE};
    use crate::wasm::WasmRuntimeConfig;
    use strata_core::block::BlockRange;
    use strata_core::storage::{MemoryStore, ObjectStore};

    #[tokio::test]
    async fn only_the_finalized_branch_is_persisted() {
        let base: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        let package = echo_package(0);
        let graph = OutputGraph::new(&package, "map_echo", true).unwrap();
        let runtime = Arc::new(WasmRuntime::new(WasmRuntimeConfig::testing(), &Default::default()).unwrap());
        let stores = StoreMap::new();
        let modules: Vec<&Module> = graph.used_modules().iter().collect();
        let executors = build_executors(&modules, &graph, &package, &runtime, &stores).unwrap();
        let config = graph.exec_out_config("map_echo", &base).unwrap();
        let writer = ExecOutputWriter::new(&[Arc::clone(&config)], 10, 20, 10);

        let mut pipeline = PipelineBuilder::new(runtime, PipelineOptions::new(BLOCK_TYPE, "map_echo", 10))
            .with_stores(stores)
            .with_executors(executors)
            .with_exec_out_writer(writer)
            .build()
            .unwrap();

        let events = [
            (ForkStep::Final, block(10)),
            (ForkStep::New, block(11)),
            (ForkStep::New, block(12)),
            (ForkStep::Undo, block(12)),
            (ForkStep::Undo, block(11)),
            (ForkStep::New, fork_block(11, "b")),
            (ForkStep::New, fork_block(12, "b")),
            (ForkStep::Final, fork_block(11, "b")),
            (ForkStep::Final, fork_block(12, "b")),
        ];
        for (step, block) in events {
            pipeline.process_block(step, block).await.unwrap();
        }
        assert_eq!(pipeline.reversible_blocks(), 0);
        pipeline.end_of_stream(20).await.unwrap();

        let mut file = config.new_file(BlockRange::new(10, 20), 10, 20);
        assert!(file.load().await.unwrap());
        assert_eq!(file.len(), 3);
        assert!(file.get(&block(10).clock).is_some());
        for n in [11, 12] {
            let kept = file.get(&fork_block(n, "b").clock).unwrap();
            assert_eq!(kept.payload, format!("block-{n}").into_bytes());
            assert!(file.get(&block(n).clock).is_none());
        }
    }
}
