use super::graph::{lowest_initial_block, ModuleGraph};
use super::hash::ModuleHashes;
use super::module::{Module, Package};
use std::collections::HashMap;
use std::sync::Arc;
use strata_core::block::BlockRange;
use strata_core::error::{Result, StrataError};
use strata_core::execout::ExecOutputConfig;
use strata_core::index::IndexFile;
use strata_core::storage::ObjectStore;
use strata_core::store::{StoreConfig, StoreLimits};

/// The part of a package one request needs: the modules computing the
/// output module, their hashes, and the modules whose artifacts are built
/// in the background.
#[derive(Debug, Clone)]
pub struct OutputGraph {
    output_module: String,
    output: Module,
    production_mode: bool,
    used_modules: Vec<Module>,
    stores: Vec<Module>,
    schedulable: Vec<Module>,
    ancestor_stores: HashMap<String, Vec<String>>,
    hashes: HashMap<String, String>,
    lowest_initial_block: u64,
}

impl OutputGraph {
    /// Resolve `output_module` in `package`.
    ///
    /// In development mode only the stores are schedulable: the output
    /// module is always executed live. In production mode the output module
    /// is schedulable too so that its outputs get cached.
    pub fn new(package: &Package, output_module: &str, production_mode: bool) -> Result<Self> {
        let graph = ModuleGraph::new(package.modules.clone())?;
        let output = graph.module(output_module)?;

        let used: Vec<&Module> = graph.modules_down_to(&[output_module])?;
        let stores: Vec<&Module> = used.iter().copied().filter(|m| m.kind.is_store()).collect();

        let mut schedulable_names: Vec<&str> = stores.iter().map(|m| m.name.as_str()).collect();
        if production_mode && !output.kind.is_store() {
            schedulable_names.push(output_module);
        }
        let schedulable = if schedulable_names.is_empty() {
            Vec::new()
        } else {
            graph.modules_down_to(&schedulable_names)?
        };

        let mut hashes = ModuleHashes::new();
        let mut ancestor_stores = HashMap::with_capacity(used.len());
        for module in &used {
            hashes.hash_module(&graph, &package.binaries, &module.name)?;
            let names = graph
                .ancestor_stores_of(&module.name)?
                .into_iter()
                .map(|m| m.name.clone())
                .collect();
            ancestor_stores.insert(module.name.clone(), names);
        }

        Ok(Self {
            output_module: output_module.to_string(),
            output: output.clone(),
            production_mode,
            lowest_initial_block: lowest_initial_block(used.iter().copied()),
            used_modules: used.into_iter().cloned().collect(),
            stores: stores.into_iter().cloned().collect(),
            schedulable: schedulable.into_iter().cloned().collect(),
            ancestor_stores,
            hashes: hashes.into_map(),
        })
    }

    /// Name of the output module.
    pub fn output_module_name(&self) -> &str {
        &self.output_module
    }

    /// The output module.
    pub fn output_module(&self) -> &Module {
        &self.output
    }

    /// Whether the graph was resolved for production mode.
    pub fn production_mode(&self) -> bool {
        self.production_mode
    }

    /// Every module needed by the output module, in execution order.
    pub fn used_modules(&self) -> &[Module] {
        &self.used_modules
    }

    /// Store modules among the used modules.
    pub fn stores(&self) -> &[Module] {
        &self.stores
    }

    /// Modules executed by background segment jobs, in execution order.
    pub fn schedulable_modules(&self) -> &[Module] {
        &self.schedulable
    }

    /// Used module named `name`.
    pub fn module(&self, name: &str) -> Option<&Module> {
        self.used_modules.iter().find(|m| m.name == name)
    }

    /// Hash of a used module.
    pub fn module_hash(&self, name: &str) -> Option<&str> {
        self.hashes.get(name).map(String::as_str)
    }

    /// Every hash by module name.
    pub fn hashes(&self) -> &HashMap<String, String> {
        &self.hashes
    }

    /// Stores `name` transitively depends on.
    pub fn ancestor_stores(&self, name: &str) -> &[String] {
        self.ancestor_stores
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Lowest initial block of the used modules.
    pub fn lowest_initial_block(&self) -> u64 {
        self.lowest_initial_block
    }

    /// Reject a start block below the output module's initial block.
    pub fn validate_start_block(&self, start: u64) -> Result<()> {
        let output = self.output_module();
        if start < output.initial_block {
            return Err(StrataError::StartBeforeInitialBlock {
                module: output.name.clone(),
                start,
                initial: output.initial_block,
            });
        }
        Ok(())
    }

    fn hashed_module(&self, name: &str) -> Result<(&Module, &str)> {
        let module = self.module(name).ok_or_else(|| StrataError::ModuleNotFound {
            module: name.to_string(),
        })?;
        let hash = self.module_hash(name).ok_or_else(|| StrataError::Internal {
            cause: format!("module '{name}' has no hash"),
        })?;
        Ok((module, hash))
    }

    /// Snapshot location and settings of store `name`.
    pub fn store_config(
        &self,
        name: &str,
        base: &Arc<dyn ObjectStore>,
        limits: StoreLimits,
    ) -> Result<Arc<StoreConfig>> {
        let (module, hash) = self.hashed_module(name)?;
        let (policy, value_type) = module.store_settings().ok_or_else(|| StrataError::Internal {
            cause: format!("module '{name}' is not a store"),
        })?;
        Ok(Arc::new(
            StoreConfig::new(name, hash, module.initial_block, policy, value_type.clone(), base)
                .with_limits(limits),
        ))
    }

    /// Output cache location of module `name`.
    pub fn exec_out_config(&self, name: &str, base: &Arc<dyn ObjectStore>) -> Result<Arc<ExecOutputConfig>> {
        let (module, hash) = self.hashed_module(name)?;
        Ok(Arc::new(ExecOutputConfig::new(name, hash, module.initial_block, base)))
    }

    /// Index file of block index module `name` over `range`.
    pub fn index_file(&self, name: &str, range: BlockRange, base: &Arc<dyn ObjectStore>) -> Result<IndexFile> {
        let (_, hash) = self.hashed_module(name)?;
        Ok(IndexFile::new(name, hash, range, base))
    }
}
