//! Module declarations as submitted by clients.

use serde::{Deserialize, Serialize};
use std::fmt;
use strata_core::store::{UpdatePolicy, ValueType};

/// What a module does with its inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModuleKind {
    /// Returns one output per block.
    Map {
        /// Protobuf type of the output.
        output_type: String,
    },
    /// Writes into its own store.
    Store {
        /// How writes combine.
        update_policy: UpdatePolicy,
        /// Declared value type.
        value_type: ValueType,
    },
    /// Emits index keys per block, consumed by block filters.
    BlockIndex {
        /// Protobuf type of the output.
        output_type: String,
    },
}

impl ModuleKind {
    /// Stable name used in hashes and errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Map { .. } => "map",
            Self::Store { .. } => "store",
            Self::BlockIndex { .. } => "block_index",
        }
    }

    /// True for map modules.
    pub fn is_map(&self) -> bool {
        matches!(self, Self::Map { .. })
    }

    /// True for store modules.
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store { .. })
    }

    /// True for block index modules.
    pub fn is_index(&self) -> bool {
        matches!(self, Self::BlockIndex { .. })
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a store input is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreMode {
    /// Read access to the store through the `state` imports.
    Get,
    /// The store deltas of the current block, as a value.
    Deltas,
}

/// One declared input of a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "input", rename_all = "snake_case")]
pub enum Input {
    /// Block payload (under the block type) or the clock.
    Source {
        /// Type of the source.
        type_url: String,
    },
    /// Output of a map module.
    Map {
        /// Upstream module.
        module: String,
    },
    /// A store module, read or as deltas.
    Store {
        /// Upstream module.
        module: String,
        /// Access mode.
        mode: StoreMode,
    },
    /// A constant string.
    Params {
        /// Parameter value.
        value: String,
    },
}

impl Input {
    /// Source input.
    pub fn source(type_url: impl Into<String>) -> Self {
        Self::Source {
            type_url: type_url.into(),
        }
    }

    /// Map input.
    pub fn map(module: impl Into<String>) -> Self {
        Self::Map {
            module: module.into(),
        }
    }

    /// Store input read through the `state` imports.
    pub fn store_get(module: impl Into<String>) -> Self {
        Self::Store {
            module: module.into(),
            mode: StoreMode::Get,
        }
    }

    /// Store input received as deltas.
    pub fn store_deltas(module: impl Into<String>) -> Self {
        Self::Store {
            module: module.into(),
            mode: StoreMode::Deltas,
        }
    }

    /// Params input.
    pub fn params(value: impl Into<String>) -> Self {
        Self::Params {
            value: value.into(),
        }
    }

    /// Upstream module, if the input refers to one.
    pub fn module_name(&self) -> Option<&str> {
        match self {
            Self::Map { module } | Self::Store { module, .. } => Some(module),
            Self::Source { .. } | Self::Params { .. } => None,
        }
    }

    /// Name used in hashes and errors.
    pub fn label(&self) -> String {
        match self {
            Self::Source { type_url } => format!("source:{type_url}"),
            Self::Map { module } => format!("map:{module}"),
            Self::Store {
                module,
                mode: StoreMode::Get,
            } => format!("store:{module}:get"),
            Self::Store {
                module,
                mode: StoreMode::Deltas,
            } => format!("store:{module}:deltas"),
            Self::Params { value } => format!("params:{value}"),
        }
    }
}

/// Restricts the blocks a module runs on to those matched by a query over
/// the keys of a block index module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockFilter {
    /// Block index module.
    pub module: String,
    /// Query over its keys.
    pub query: String,
}

/// A declared module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    /// Unique name within the package.
    pub name: String,
    /// Kind and kind-specific settings.
    #[serde(flatten)]
    pub kind: ModuleKind,
    /// First block the module runs on.
    #[serde(default)]
    pub initial_block: u64,
    /// Inputs, in call argument order.
    #[serde(default)]
    pub inputs: Vec<Input>,
    /// Index of the binary in the package.
    #[serde(default)]
    pub binary_index: usize,
    /// Exported function to call.
    pub entrypoint: String,
    /// Optional block filter.
    #[serde(default)]
    pub block_filter: Option<BlockFilter>,
}

impl Module {
    fn new(name: impl Into<String>, kind: ModuleKind) -> Self {
        let name = name.into();
        Self {
            entrypoint: name.clone(),
            name,
            kind,
            initial_block: 0,
            inputs: Vec::new(),
            binary_index: 0,
            block_filter: None,
        }
    }

    /// A map module whose entrypoint is its name.
    pub fn map(name: impl Into<String>) -> Self {
        Self::new(
            name,
            ModuleKind::Map {
                output_type: "bytes".to_string(),
            },
        )
    }

    /// A store module whose entrypoint is its name.
    pub fn store(name: impl Into<String>, update_policy: UpdatePolicy, value_type: ValueType) -> Self {
        Self::new(
            name,
            ModuleKind::Store {
                update_policy,
                value_type,
            },
        )
    }

    /// A block index module whose entrypoint is its name.
    pub fn index(name: impl Into<String>) -> Self {
        Self::new(
            name,
            ModuleKind::BlockIndex {
                output_type: "strata.v1.IndexKeys".to_string(),
            },
        )
    }

    /// Set the initial block.
    pub fn with_initial_block(mut self, block: u64) -> Self {
        self.initial_block = block;
        self
    }

    /// Append an input.
    pub fn with_input(mut self, input: Input) -> Self {
        self.inputs.push(input);
        self
    }

    /// Set the binary index.
    pub fn with_binary(mut self, index: usize) -> Self {
        self.binary_index = index;
        self
    }

    /// Set the exported function to call.
    pub fn with_entrypoint(mut self, entrypoint: impl Into<String>) -> Self {
        self.entrypoint = entrypoint.into();
        self
    }

    /// Set the block filter.
    pub fn with_block_filter(mut self, module: impl Into<String>, query: impl Into<String>) -> Self {
        self.block_filter = Some(BlockFilter {
            module: module.into(),
            query: query.into(),
        });
        self
    }

    /// Modules this one depends on: its inputs then its filter module,
    /// without duplicates.
    pub fn dependencies(&self) -> Vec<&str> {
        let mut deps: Vec<&str> = Vec::new();
        let filter = self.block_filter.as_ref().map(|f| f.module.as_str());
        for dep in self.inputs.iter().filter_map(Input::module_name).chain(filter) {
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }
        deps
    }

    /// Store settings, for store modules.
    pub fn store_settings(&self) -> Option<(UpdatePolicy, &ValueType)> {
        match &self.kind {
            ModuleKind::Store {
                update_policy,
                value_type,
            } => Some((*update_policy, value_type)),
            _ => None,
        }
    }
}

/// A compiled module binary.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binary {
    /// Binary format, e.g. `wasm/rust-v1`.
    pub r#type: String,
    /// Raw content.
    pub content: Vec<u8>,
}

impl Binary {
    /// A WASM binary.
    pub fn wasm(content: impl Into<Vec<u8>>) -> Self {
        Self {
            r#type: "wasm/rust-v1".to_string(),
            content: content.into(),
        }
    }
}

impl fmt::Debug for Binary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binary")
            .field("type", &self.r#type)
            .field("len", &self.content.len())
            .finish()
    }
}

/// Modules plus the binaries they run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Declared modules.
    pub modules: Vec<Module>,
    /// Binaries referenced by `Module::binary_index`.
    pub binaries: Vec<Binary>,
}

impl Package {
    /// An empty package.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a module.
    pub fn with_module(mut self, module: Module) -> Self {
        self.modules.push(module);
        self
    }

    /// Append a binary.
    pub fn with_binary(mut self, binary: Binary) -> Self {
        self.binaries.push(binary);
        self
    }

    /// Binary of `module`.
    pub fn binary_of(&self, module: &Module) -> Option<&Binary> {
        self.binaries.get(module.binary_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependencies_include_filter_once() {
        let module = Module::map("m")
            .with_input(Input::source("block"))
            .with_input(Input::map("a"))
            .with_input(Input::store_get("s"))
            .with_input(Input::map("a"))
            .with_block_filter("idx", "k")
            .with_block_filter("idx", "k");
        assert_eq!(module.dependencies(), vec!["a", "s", "idx"]);
    }

    #[test]
    fn serde_shape() {
        let module = Module::store("s", UpdatePolicy::Add, ValueType::BigInt)
            .with_initial_block(10)
            .with_input(Input::map("m"));
        let json = serde_json::to_value(&module).unwrap();
        assert_eq!(json["kind"], "store");
        assert_eq!(json["update_policy"], "add");
        assert_eq!(json["value_type"], "bigint");
        assert_eq!(json["inputs"][0]["input"], "map");

        let back: Module = serde_json::from_value(json).unwrap();
        assert_eq!(back, module);
    }

    #[test]
    fn input_labels() {
        assert_eq!(Input::store_deltas("s").label(), "store:s:deltas");
        assert_eq!(Input::params("x=1").label(), "params:x=1");
        assert_eq!(Input::source("sf.Block").module_name(), None);
    }
}
