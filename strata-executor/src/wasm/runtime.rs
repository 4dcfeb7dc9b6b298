//! WASM runtime management using Wasmtime.
//!
//! Owns the engine, the linker carrying every host import and the cache of
//! compiled module binaries.

use super::call::{Argument, Call, HostState};
use super::extension::ExtensionRegistry;
use super::host::register_host_functions;
use super::memory::MemoryBridge;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use strata_core::error::{Result, StrataError};
use tracing::{debug, trace};
use wasmtime::{Config, Engine, Linker, Module, Store, StoreLimitsBuilder, Trap, Val};

/// Default maximum memory pages (64 KB per page).
const DEFAULT_MAX_MEMORY_PAGES: u32 = 1024; // 64 MB

/// Fuel granted to one call unless configured otherwise.
pub const DEFAULT_FUEL: u64 = 1_000_000_000;

/// Bytes per WASM page.
const WASM_PAGE_SIZE: usize = 64 * 1024;

/// Configuration for the WASM runtime.
#[derive(Debug, Clone)]
pub struct WasmRuntimeConfig {
    /// Maximum memory pages allowed per instance.
    pub max_memory_pages: u32,
    /// Whether every call runs with a fuel budget.
    pub fuel_enabled: bool,
    /// Fuel budget of one call when fuel is enabled.
    pub fuel_amount: u64,
    /// Whether calls can be interrupted by epoch ticks.
    pub epoch_interruption: bool,
    /// Ticks a call may run for when epoch interruption is enabled.
    pub epoch_deadline: u64,
    /// Whether to cache compiled modules.
    pub cache_modules: bool,
    /// Enable debug info in compiled modules.
    pub debug_info: bool,
}

impl Default for WasmRuntimeConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl WasmRuntimeConfig {
    /// Configuration for serving requests.
    pub fn production() -> Self {
        Self {
            max_memory_pages: DEFAULT_MAX_MEMORY_PAGES,
            fuel_enabled: true,
            fuel_amount: DEFAULT_FUEL,
            epoch_interruption: false,
            epoch_deadline: 1,
            cache_modules: true,
            debug_info: false,
        }
    }

    /// Configuration for tests, with stricter limits.
    pub fn testing() -> Self {
        Self {
            max_memory_pages: 256, // 16 MB
            fuel_enabled: true,
            fuel_amount: 10_000_000,
            epoch_interruption: false,
            epoch_deadline: 1,
            cache_modules: false,
            debug_info: true,
        }
    }

    /// Set maximum memory pages.
    pub fn with_max_memory_pages(mut self, pages: u32) -> Self {
        self.max_memory_pages = pages;
        self
    }

    /// Enable or disable fuel-based limiting.
    pub fn with_fuel(mut self, enabled: bool, amount: u64) -> Self {
        self.fuel_enabled = enabled;
        self.fuel_amount = amount;
        self
    }

    /// Enable or disable epoch interruption.
    pub fn with_epoch_interruption(mut self, enabled: bool, deadline: u64) -> Self {
        self.epoch_interruption = enabled;
        self.epoch_deadline = deadline;
        self
    }

    /// Enable or disable module caching.
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_modules = enabled;
        self
    }

    /// Limits taken from the executor configuration. Metering stays on:
    /// a zero fuel budget falls back to [`DEFAULT_FUEL`].
    pub fn from_runtime(config: &crate::config::RuntimeConfig) -> Self {
        let fuel = if config.wasm_fuel == 0 {
            DEFAULT_FUEL
        } else {
            config.wasm_fuel
        };
        Self::production()
            .with_max_memory_pages(config.wasm_max_memory_pages)
            .with_fuel(true, fuel)
    }

    fn to_wasmtime_config(&self) -> Config {
        let mut config = Config::new();
        config.epoch_interruption(self.epoch_interruption);
        config.consume_fuel(self.fuel_enabled);
        config.debug_info(self.debug_info);
        config.strategy(wasmtime::Strategy::Cranelift);
        config
    }
}

/// A compiled module binary ready for instantiation.
#[derive(Debug)]
pub struct CompiledModule {
    module: Module,
    hash: String,
}

impl CompiledModule {
    /// The underlying Wasmtime module.
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Hex SHA-256 of the binary.
    pub fn hash(&self) -> &str {
        &self.hash
    }
}

/// Engine, linker and compiled-module cache shared by every pipeline of a
/// process.
pub struct WasmRuntime {
    engine: Engine,
    config: WasmRuntimeConfig,
    linker: Linker<HostState>,
    module_cache: DashMap<String, Arc<CompiledModule>>,
}

impl std::fmt::Debug for WasmRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmRuntime")
            .field("config", &self.config)
            .field("cached_modules", &self.module_cache.len())
            .finish()
    }
}

impl WasmRuntime {
    /// Create a runtime exposing the built-in imports plus `extensions`.
    pub fn new(config: WasmRuntimeConfig, extensions: &ExtensionRegistry) -> Result<Self> {
        let engine = Engine::new(&config.to_wasmtime_config()).map_err(|e| StrataError::WasmLoad {
            module: "engine".to_string(),
            cause: e.to_string(),
        })?;

        let mut linker = Linker::new(&engine);
        register_host_functions(&mut linker)?;
        extensions.register(&mut linker)?;

        Ok(Self {
            engine,
            config,
            linker,
            module_cache: DashMap::new(),
        })
    }

    /// Runtime with the default configuration and no extension.
    pub fn with_defaults() -> Result<Self> {
        Self::new(WasmRuntimeConfig::default(), &ExtensionRegistry::new())
    }

    /// The Wasmtime engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// The runtime configuration.
    pub fn config(&self) -> &WasmRuntimeConfig {
        &self.config
    }

    /// Compile a module binary, reusing the cached compilation of identical
    /// bytes when caching is enabled.
    pub fn compile(&self, name: &str, wasm_bytes: &[u8]) -> Result<Arc<CompiledModule>> {
        let hash = hex::encode(Sha256::digest(wasm_bytes));

        if self.config.cache_modules {
            if let Some(cached) = self.module_cache.get(&hash) {
                return Ok(Arc::clone(&cached));
            }
        }

        let module = Module::new(&self.engine, wasm_bytes).map_err(|e| StrataError::WasmLoad {
            module: name.to_string(),
            cause: e.to_string(),
        })?;
        debug!(module = %name, hash = %hash, "compiled module binary");

        let compiled = Arc::new(CompiledModule { module, hash });
        if self.config.cache_modules {
            self.module_cache
                .insert(compiled.hash.clone(), Arc::clone(&compiled));
        }
        Ok(compiled)
    }

    /// Clear the module cache.
    pub fn clear_cache(&self) {
        self.module_cache.clear();
    }

    /// Number of cached modules.
    pub fn cache_size(&self) -> usize {
        self.module_cache.len()
    }

    /// Advance the epoch of every running call.
    pub fn increment_epoch(&self) {
        self.engine.increment_epoch();
    }

    /// Instantiate `module`, pass `args` to `entrypoint` and return the call
    /// with its output, logs and panic.
    ///
    /// Every call gets a fresh instance: guest memory never outlives a call,
    /// so everything the host keeps is copied out of it.
    pub fn invoke(
        &self,
        module: &CompiledModule,
        entrypoint: &str,
        args: &[Argument],
        call: Call,
    ) -> Result<Call> {
        let module_name = call.module_name().to_string();
        let block = call.block_num();
        let limits = StoreLimitsBuilder::new()
            .memory_size(self.config.max_memory_pages as usize * WASM_PAGE_SIZE)
            .build();
        let mut store = Store::new(&self.engine, HostState { call, limits });
        store.limiter(|state| &mut state.limits);

        if self.config.fuel_enabled {
            store
                .set_fuel(self.config.fuel_amount)
                .map_err(|e| StrataError::ModuleExecution {
                    module: module_name.clone(),
                    block,
                    cause: format!("failed to set fuel: {e}"),
                })?;
        }
        if self.config.epoch_interruption {
            store.set_epoch_deadline(self.config.epoch_deadline);
        }

        let instance = self
            .linker
            .instantiate(&mut store, module.module())
            .map_err(|e| StrataError::WasmLoad {
                module: module_name.clone(),
                cause: format!("failed to instantiate: {e}"),
            })?;

        let bridge = MemoryBridge::from_instance(&mut store, &instance, &module_name)?;
        let func = instance
            .get_func(&mut store, entrypoint)
            .ok_or_else(|| StrataError::WasmLoad {
                module: module_name.clone(),
                cause: format!("entrypoint '{entrypoint}' is not exported"),
            })?;

        let mut params = Vec::with_capacity(args.len() * 2);
        for arg in args {
            match arg {
                Argument::Bytes(bytes) => {
                    let ptr = bridge.copy_to_wasm(&mut store, bytes)?;
                    params.push(Val::I32(ptr.offset as i32));
                    params.push(Val::I32(ptr.size as i32));
                }
                Argument::StoreReader(index) => params.push(Val::I32(*index as i32)),
            }
        }
        let mut results = vec![Val::I32(0); func.ty(&store).results().len()];

        trace!(module = %module_name, block, entrypoint, args = args.len(), "calling module");
        let outcome = func.call(&mut store, &params, &mut results);

        let mut state = store.into_data();
        if let Some(panic) = state.call.take_panic() {
            return Err(panic.into_error(&module_name, block));
        }
        if let Some(fault) = state.call.take_fault() {
            return Err(fault);
        }
        if let Err(err) = outcome {
            if matches!(err.downcast_ref::<Trap>(), Some(Trap::OutOfFuel | Trap::Interrupt)) {
                return Err(StrataError::FuelExhausted {
                    module: module_name,
                    block,
                });
            }
            return Err(StrataError::ModuleExecution {
                module: module_name,
                block,
                cause: state.call.describe_failure(&format!("{err:#}")),
            });
        }
        Ok(state.call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_config_presets() {
        let config = WasmRuntimeConfig::default();
        assert_eq!(config.max_memory_pages, DEFAULT_MAX_MEMORY_PAGES);
        assert!(config.fuel_enabled);
        assert_eq!(config.fuel_amount, DEFAULT_FUEL);
        assert!(config.cache_modules);

        let config = WasmRuntimeConfig::testing();
        assert!(config.fuel_enabled);
        assert!(config.debug_info);
        assert!(!config.cache_modules);
    }

    #[test]
    fn runtime_config_from_executor_config() {
        let executor = crate::config::RuntimeConfig {
            wasm_fuel: 5_000,
            wasm_max_memory_pages: 16,
            ..Default::default()
        };
        let config = WasmRuntimeConfig::from_runtime(&executor);
        assert!(config.fuel_enabled);
        assert_eq!(config.fuel_amount, 5_000);
        assert_eq!(config.max_memory_pages, 16);

        let config = WasmRuntimeConfig::from_runtime(&crate::config::RuntimeConfig::default());
        assert!(config.fuel_enabled);
        assert_eq!(config.fuel_amount, DEFAULT_FUEL);

        let unmetered = crate::config::RuntimeConfig {
            wasm_fuel: 0,
            ..Default::default()
        };
        let config = WasmRuntimeConfig::from_runtime(&unmetered);
        assert!(config.fuel_enabled);
        assert_eq!(config.fuel_amount, DEFAULT_FUEL);
    }

    #[test]
    fn compile_caches_identical_bytes() {
        let runtime = WasmRuntime::with_defaults().unwrap();
        let wasm = wat::parse_str("(module)").unwrap();
        let a = runtime.compile("a", &wasm).unwrap();
        let b = runtime.compile("b", &wasm).unwrap();
        assert_eq!(a.hash(), b.hash());
        assert_eq!(runtime.cache_size(), 1);

        runtime.clear_cache();
        assert_eq!(runtime.cache_size(), 0);
    }

    #[test]
    fn invalid_binary_is_a_load_error() {
        let runtime = WasmRuntime::with_defaults().unwrap();
        let err = runtime.compile("broken", b"not wasm").unwrap_err();
        assert_eq!(err.code(), "E701");
    }
}
