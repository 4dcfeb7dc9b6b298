//! Resolution of module inputs into call arguments.

use crate::manifest::{Input, Module, StoreMode};
use crate::wasm::{Argument, Call};
use strata_core::error::{Result, StrataError};
use strata_core::execout::ExecOutputBuffer;
use strata_core::store::{StoreHandle, StoreMap};

/// Where one argument of a module comes from, resolved once per request.
#[derive(Debug, Clone)]
pub enum ArgumentSource {
    /// An entry of the block's output buffer: the block, the clock, a map
    /// output or the deltas of a store.
    Value(String),
    /// Constant parameters.
    Params(Vec<u8>),
    /// Read access to a store.
    Reader(StoreHandle),
}

/// Resolve the declared inputs of `module` against the stores of the
/// pipeline.
pub fn resolve_inputs(module: &Module, stores: &StoreMap) -> Result<Vec<ArgumentSource>> {
    module
        .inputs
        .iter()
        .map(|input| match input {
            Input::Source { type_url } => Ok(ArgumentSource::Value(type_url.clone())),
            Input::Map { module } => Ok(ArgumentSource::Value(module.clone())),
            Input::Store {
                module: store,
                mode: StoreMode::Deltas,
            } => Ok(ArgumentSource::Value(store.clone())),
            Input::Store {
                module: store,
                mode: StoreMode::Get,
            } => stores
                .get(store)
                .cloned()
                .map(ArgumentSource::Reader)
                .ok_or_else(|| StrataError::Internal {
                    cause: format!(
                        "store '{store}' read by '{}' is not loaded in the pipeline",
                        module.name
                    ),
                }),
            Input::Params { value } => Ok(ArgumentSource::Params(value.as_bytes().to_vec())),
        })
        .collect()
}

/// Build the arguments of one call from `buffer`, registering store readers
/// on `call`.
///
/// Returns `None` when every value argument is empty and `has_writer` is
/// false: such a call can only produce an empty output.
pub fn collect_arguments(
    sources: &[ArgumentSource],
    buffer: &ExecOutputBuffer,
    call: &mut Call,
    has_writer: bool,
) -> Option<Vec<Argument>> {
    let mut args = Vec::with_capacity(sources.len());
    let mut has_input = false;
    for source in sources {
        match source {
            ArgumentSource::Value(name) => {
                let value = buffer.get(name).unwrap_or_default();
                has_input |= !value.is_empty();
                args.push(Argument::Bytes(value.to_vec()));
            }
            ArgumentSource::Params(value) => args.push(Argument::Bytes(value.clone())),
            ArgumentSource::Reader(store) => {
                let index = call.add_reader(store.clone());
                args.push(Argument::StoreReader(index));
            }
        }
    }
    (has_input || has_writer).then_some(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use strata_core::pb::Clock;
    use strata_core::storage::{MemoryStore, ObjectStore};
    use strata_core::store::{StoreConfig, UpdatePolicy, ValueType};
    use strata_core::types::Block;

    fn stores() -> StoreMap {
        let base: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        let config = Arc::new(StoreConfig::new(
            "store_balances",
            "h",
            0,
            UpdatePolicy::Set,
            ValueType::Bytes,
            &base,
        ));
        let mut stores = StoreMap::new();
        stores.insert(config.new_full_kv());
        stores
    }

    fn module() -> Module {
        Module::map("map_out")
            .with_input(Input::source("test.Block"))
            .with_input(Input::map("map_events"))
            .with_input(Input::store_get("store_balances"))
            .with_input(Input::params("threshold=10"))
    }

    #[test]
    fn inputs_resolve_in_declaration_order() {
        let sources = resolve_inputs(&module(), &stores()).unwrap();
        assert_eq!(sources.len(), 4);
        assert!(matches!(&sources[0], ArgumentSource::Value(name) if name == "test.Block"));
        assert!(matches!(&sources[1], ArgumentSource::Value(name) if name == "map_events"));
        assert!(matches!(&sources[2], ArgumentSource::Reader(_)));
        assert!(matches!(&sources[3], ArgumentSource::Params(p) if p == b"threshold=10"));
    }

    #[test]
    fn unknown_reader_store_is_an_error() {
        let module = Module::map("m").with_input(Input::store_get("missing"));
        let err = resolve_inputs(&module, &stores()).unwrap_err();
        assert_eq!(err.code(), "E903");
    }

    #[test]
    fn empty_inputs_skip_the_call() {
        let sources = resolve_inputs(&module(), &stores()).unwrap();
        let block = Block::new(Clock::new(3, "b3", 0), Vec::new());
        let buffer = ExecOutputBuffer::new("test.Block", &block);
        let mut call = Call::new("map_out", Arc::new(block.clock.clone()));

        assert!(collect_arguments(&sources, &buffer, &mut call, false).is_none());
        assert!(collect_arguments(&sources, &buffer, &mut call, true).is_some());
    }

    #[test]
    fn readers_are_numbered_per_call() {
        let sources = resolve_inputs(&module(), &stores()).unwrap();
        let block = Block::new(Clock::new(3, "b3", 0), b"payload".to_vec());
        let buffer = ExecOutputBuffer::new("test.Block", &block);
        let mut call = Call::new("map_out", Arc::new(block.clock.clone()));

        let args = collect_arguments(&sources, &buffer, &mut call, false).unwrap();
        assert_eq!(args[0], Argument::Bytes(b"payload".to_vec()));
        assert_eq!(args[1], Argument::Bytes(Vec::new()));
        assert_eq!(args[2], Argument::StoreReader(0));
        assert!(call.reader(0).is_some());
    }
}
