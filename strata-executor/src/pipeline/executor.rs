//! Per-module execution.
//!
//! Behavior is selected by the [`ExecutorKind`] tag: maps return their call
//! output, stores return the marshalled deltas of their own store and block
//! index modules return their keys.

use super::arguments::{collect_arguments, resolve_inputs, ArgumentSource};
use crate::manifest::{Module, ModuleKind};
use crate::wasm::{Call, CompiledModule, WasmRuntime};
use prost::Message;
use roaring::RoaringTreemap;
use std::collections::HashMap;
use std::sync::Arc;
use strata_core::error::{Result, StrataError};
use strata_core::execout::ExecOutputBuffer;
use strata_core::index::BlockIndex;
use strata_core::pb::{Clock, IndexKeys, MapModuleOutput, StoreDeltas, StoreModuleOutput};
use strata_core::store::{StoreHandle, StoreMap};
use tracing::trace;

/// Kind-specific part of an executor.
#[derive(Debug, Clone)]
pub enum ExecutorKind {
    /// Map module.
    Map,
    /// Store module writing into the given store.
    Store(StoreHandle),
    /// Block index module.
    Index,
}

/// The block filter of a module.
#[derive(Debug, Clone)]
struct ModuleFilter {
    index_module: String,
    index: BlockIndex,
}

/// Result of running one module on one block.
#[derive(Debug, Clone, Default)]
pub struct ModuleRun {
    /// Output bytes: the call output, or the marshalled store deltas.
    pub output: Vec<u8>,
    /// Whether WASM was called; `false` when every input was empty.
    pub executed: bool,
    /// Guest log lines.
    pub logs: Vec<String>,
    /// Whether guest log lines were dropped.
    pub logs_truncated: bool,
}

/// An output as streamed to clients.
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleOutput {
    /// Output of a map or block index module.
    Map(MapModuleOutput),
    /// Deltas of a store module.
    Store(StoreModuleOutput),
}

/// Runs one module of the plan.
#[derive(Debug, Clone)]
pub struct ModuleExecutor {
    name: String,
    hash: String,
    entrypoint: String,
    initial_block: u64,
    kind: ExecutorKind,
    compiled: Arc<CompiledModule>,
    arguments: Vec<ArgumentSource>,
    filter: Option<ModuleFilter>,
}

impl ModuleExecutor {
    /// Executor for `module`, resolving its store inputs and its own store
    /// in `stores`.
    pub fn new(
        module: &Module,
        hash: impl Into<String>,
        compiled: Arc<CompiledModule>,
        stores: &StoreMap,
    ) -> Result<Self> {
        let kind = match &module.kind {
            ModuleKind::Map { .. } => ExecutorKind::Map,
            ModuleKind::BlockIndex { .. } => ExecutorKind::Index,
            ModuleKind::Store { .. } => {
                let store = stores.get(&module.name).cloned().ok_or_else(|| {
                    StrataError::Internal {
                        cause: format!("store '{}' is not loaded in the pipeline", module.name),
                    }
                })?;
                ExecutorKind::Store(store)
            }
        };
        let filter = module
            .block_filter
            .as_ref()
            .map(|filter| {
                BlockIndex::new(&filter.query).map(|index| ModuleFilter {
                    index_module: filter.module.clone(),
                    index,
                })
            })
            .transpose()?;

        Ok(Self {
            name: module.name.clone(),
            hash: hash.into(),
            entrypoint: module.entrypoint.clone(),
            initial_block: module.initial_block,
            arguments: resolve_inputs(module, stores)?,
            kind,
            compiled,
            filter,
        })
    }

    /// Module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Module hash.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Kind tag.
    pub fn kind(&self) -> &ExecutorKind {
        &self.kind
    }

    /// Whether this executor writes a store.
    pub fn is_store(&self) -> bool {
        matches!(self.kind, ExecutorKind::Store(_))
    }

    /// Whether this executor is a block index module.
    pub fn is_index(&self) -> bool {
        matches!(self.kind, ExecutorKind::Index)
    }

    /// Index module of the block filter, if any.
    pub fn filter_module(&self) -> Option<&str> {
        self.filter.as_ref().map(|f| f.index_module.as_str())
    }

    /// Resolve the block filter from the bitmaps of an index file covering
    /// the blocks about to be processed.
    pub fn precompute_filter(&mut self, indices: &HashMap<String, RoaringTreemap>) {
        if let Some(filter) = self.filter.as_mut() {
            filter.index = filter.index.clone().with_precomputed(indices);
        }
    }

    /// Whether the module runs on the block of `buffer`: the block is at or
    /// past its initial block and matched by its block filter.
    pub fn runs_on_block(&self, buffer: &ExecOutputBuffer) -> Result<bool> {
        let block_num = buffer.clock().number;
        if block_num < self.initial_block {
            return Ok(false);
        }
        let Some(filter) = &self.filter else {
            return Ok(true);
        };
        if filter.index.is_precomputed() {
            return Ok(filter.index.matches(block_num, None));
        }
        let keys = buffer
            .get(&filter.index_module)
            .map(IndexKeys::decode)
            .transpose()
            .map_err(|e| StrataError::ModuleExecution {
                module: filter.index_module.clone(),
                block: block_num,
                cause: format!("invalid index keys: {e}"),
            })?;
        Ok(filter
            .index
            .matches(block_num, keys.as_ref().map(|k| k.keys.as_slice())))
    }

    /// Run the module on the block of `buffer`.
    pub fn run(
        &self,
        runtime: &WasmRuntime,
        buffer: &ExecOutputBuffer,
        clock: &Arc<Clock>,
    ) -> Result<ModuleRun> {
        let mut call = Call::new(self.name.clone(), Arc::clone(clock));
        let writer = match &self.kind {
            ExecutorKind::Store(store) => Some(store),
            ExecutorKind::Map | ExecutorKind::Index => None,
        };

        let Some(args) = collect_arguments(&self.arguments, buffer, &mut call, writer.is_some())
        else {
            trace!(module = %self.name, block_num = clock.number, "all inputs empty, skipping call");
            return Ok(ModuleRun::default());
        };
        if let Some(store) = writer {
            call = call.with_writer(Arc::clone(store));
        }

        let span = crate::module_span!(self.name, clock.number);
        let mut call = span.in_scope(|| runtime.invoke(&self.compiled, &self.entrypoint, &args, call))?;
        let output = match &self.kind {
            ExecutorKind::Store(store) => StoreDeltas {
                deltas: store.lock().deltas().to_vec(),
            }
            .encode_to_vec(),
            ExecutorKind::Map | ExecutorKind::Index => call.take_output(),
        };
        Ok(ModuleRun {
            output,
            executed: true,
            logs: call.logs().to_vec(),
            logs_truncated: call.logs_truncated(),
        })
    }

    /// Replay a cached output: stores get the cached deltas applied, maps
    /// and index modules have nothing to do.
    pub fn apply_cached(&self, bytes: &[u8]) -> Result<()> {
        let ExecutorKind::Store(store) = &self.kind else {
            return Ok(());
        };
        let deltas = StoreDeltas::decode(bytes).map_err(|e| StrataError::StoreDecode {
            module: self.name.clone(),
            cause: format!("cached deltas: {e}"),
        })?;
        store.lock().set_deltas(deltas.deltas);
        Ok(())
    }

    /// Shape `bytes` as streamed to clients.
    pub fn to_module_output(&self, bytes: &[u8], cached: bool) -> Result<ModuleOutput> {
        match &self.kind {
            ExecutorKind::Store(_) => {
                let deltas = StoreDeltas::decode(bytes).map_err(|e| StrataError::StoreDecode {
                    module: self.name.clone(),
                    cause: e.to_string(),
                })?;
                Ok(ModuleOutput::Store(StoreModuleOutput {
                    name: self.name.clone(),
                    deltas: deltas.deltas,
                }))
            }
            ExecutorKind::Map | ExecutorKind::Index => Ok(ModuleOutput::Map(MapModuleOutput {
                name: self.name.clone(),
                payload: bytes.to_vec(),
                cached,
            })),
        }
    }

    /// Index keys in `bytes`, for index modules.
    pub fn index_keys(&self, bytes: &[u8]) -> Result<Vec<String>> {
        IndexKeys::decode(bytes)
            .map(|k| k.keys)
            .map_err(|e| StrataError::Serialization(format!("index keys of '{}': {e}", self.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Input;
    use crate::wasm::WasmRuntimeConfig;
    use strata_core::pb::{store_delta::Operation, StoreDelta};
    use strata_core::storage::{MemoryStore, ObjectStore};
    use strata_core::store::{StoreConfig, UpdatePolicy, ValueType};
    use strata_core::types::Block;

    fn runtime() -> WasmRuntime {
        WasmRuntime::new(WasmRuntimeConfig::testing(), &Default::default()).unwrap()
    }

    fn compiled(runtime: &WasmRuntime) -> Arc<CompiledModule> {
        let wasm = wat::parse_str(
            r#"(module
                (memory (export "memory") 1)
                (func (export "alloc") (param i32) (result i32) i32.const 1024)
                (func (export "dealloc") (param i32 i32)))"#,
        )
        .unwrap();
        runtime.compile("m", &wasm).unwrap()
    }

    fn stores() -> StoreMap {
        let base: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        let config = Arc::new(StoreConfig::new(
            "store_totals",
            "h",
            0,
            UpdatePolicy::Set,
            ValueType::String,
            &base,
        ));
        let mut stores = StoreMap::new();
        stores.insert(config.new_full_kv());
        stores
    }

    fn buffer(n: u64) -> ExecOutputBuffer {
        ExecOutputBuffer::new("test.Block", &Block::new(Clock::new(n, format!("b{n}"), 0), Vec::new()))
    }

    #[test]
    fn initial_block_gates_execution() {
        let runtime = runtime();
        let module = Module::map("map_a").with_initial_block(10);
        let executor = ModuleExecutor::new(&module, "h", compiled(&runtime), &stores()).unwrap();
        assert!(!executor.runs_on_block(&buffer(9)).unwrap());
        assert!(executor.runs_on_block(&buffer(10)).unwrap());
    }

    #[test]
    fn block_filter_reads_index_keys_from_buffer() {
        let runtime = runtime();
        let module = Module::map("map_a").with_block_filter("idx", "transfer || mint");
        let module = ModuleExecutor::new(&module, "h", compiled(&runtime), &stores()).unwrap();
        let mut with_keys = buffer(5);
        with_keys.set(
            "idx",
            IndexKeys {
                keys: vec!["mint".to_string()],
            }
            .encode_to_vec(),
        );
        assert!(module.runs_on_block(&with_keys).unwrap());
        assert!(!module.runs_on_block(&buffer(5)).unwrap());
    }

    #[test]
    fn precomputed_filter_ignores_buffer() {
        let runtime = runtime();
        let module = Module::map("map_a").with_block_filter("idx", "transfer");
        let mut executor = ModuleExecutor::new(&module, "h", compiled(&runtime), &stores()).unwrap();
        let mut indices = HashMap::new();
        indices.insert("transfer".to_string(), [7u64].into_iter().collect::<RoaringTreemap>());
        executor.precompute_filter(&indices);

        assert!(executor.runs_on_block(&buffer(7)).unwrap());
        assert!(!executor.runs_on_block(&buffer(8)).unwrap());
    }

    #[test]
    fn map_with_empty_inputs_is_not_called() {
        let runtime = runtime();
        let module = Module::map("map_a").with_input(Input::map("upstream"));
        let executor = ModuleExecutor::new(&module, "h", compiled(&runtime), &stores()).unwrap();
        let clock = Arc::new(Clock::new(1, "b1", 0));
        let run = executor.run(&runtime, &buffer(1), &clock).unwrap();
        assert!(!run.executed);
        assert!(run.output.is_empty());
    }

    #[test]
    fn cached_store_deltas_are_applied() {
        let runtime = runtime();
        let stores = stores();
        let module = Module::store("store_totals", UpdatePolicy::Set, ValueType::String);
        let executor = ModuleExecutor::new(&module, "h", compiled(&runtime), &stores).unwrap();

        let deltas = StoreDeltas {
            deltas: vec![StoreDelta {
                operation: Operation::Create as i32,
                ordinal: 1,
                key: "k".to_string(),
                old_value: Vec::new(),
                new_value: b"v".to_vec(),
            }],
        }
        .encode_to_vec();
        executor.apply_cached(&deltas).unwrap();

        let store = stores.get("store_totals").unwrap().lock();
        assert_eq!(store.get_last("k"), Some(&b"v"[..]));
        assert_eq!(store.deltas().len(), 1);
        drop(store);

        match executor.to_module_output(&deltas, true).unwrap() {
            ModuleOutput::Store(out) => assert_eq!(out.deltas.len(), 1),
            other => panic!("unexpected output {other:?}"),
        }
    }

    #[test]
    fn store_executor_requires_loaded_store() {
        let runtime = runtime();
        let module = Module::store("other", UpdatePolicy::Set, ValueType::String);
        assert!(ModuleExecutor::new(&module, "h", compiled(&runtime), &stores()).is_err());
    }
}
