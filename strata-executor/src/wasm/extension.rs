//! Host extensions: additional namespaced imports such as RPC callouts.
//!
//! An extension import has the signature `(ptr, len, out_ptr) -> ()`: the
//! host reads the input at `(ptr, len)`, runs the extension and writes the
//! `(ptr, len)` of the result at `out_ptr`.

use super::call::HostState;
use super::host::RESERVED_NAMESPACES;
use super::memory::{MemoryBridge, WasmPtr};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use strata_core::error::{Result, StrataError};
use strata_core::pb::Clock;
use wasmtime::{Caller, Linker};

/// A host function callable by guests.
pub trait HostExtension: Send + Sync {
    /// Handle one call made while processing the block of `clock`.
    fn call(&self, clock: &Clock, input: &[u8]) -> Result<Vec<u8>>;
}

impl<F> HostExtension for F
where
    F: Fn(&Clock, &[u8]) -> Result<Vec<u8>> + Send + Sync,
{
    fn call(&self, clock: &Clock, input: &[u8]) -> Result<Vec<u8>> {
        self(clock, input)
    }
}

/// Extensions keyed by `(namespace, function)`.
#[derive(Clone, Default)]
pub struct ExtensionRegistry {
    extensions: BTreeMap<(String, String), Arc<dyn HostExtension>>,
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.extensions.keys()).finish()
    }
}

impl ExtensionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an extension. Reserved namespaces are rejected; registering the
    /// same function twice replaces the first one.
    pub fn add(
        &mut self,
        namespace: &str,
        function: &str,
        extension: impl HostExtension + 'static,
    ) -> Result<()> {
        if RESERVED_NAMESPACES.contains(&namespace) {
            return Err(StrataError::ReservedNamespace {
                namespace: namespace.to_string(),
            });
        }
        self.extensions.insert(
            (namespace.to_string(), function.to_string()),
            Arc::new(extension),
        );
        Ok(())
    }

    /// Number of extensions.
    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    /// True when no extension is registered.
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Whether `(namespace, function)` is registered.
    pub fn contains(&self, namespace: &str, function: &str) -> bool {
        self.extensions
            .contains_key(&(namespace.to_string(), function.to_string()))
    }

    pub(crate) fn register(&self, linker: &mut Linker<HostState>) -> Result<()> {
        for ((namespace, function), extension) in &self.extensions {
            let extension = Arc::clone(extension);
            let qualified = format!("{namespace}.{function}");
            let label = qualified.clone();
            linker
                .func_wrap(
                    namespace,
                    function,
                    move |mut caller: Caller<'_, HostState>,
                          ptr: i32,
                          len: i32,
                          out_ptr: i32|
                          -> anyhow::Result<()> {
                        let result = invoke(&mut caller, extension.as_ref(), &label, ptr, len, out_ptr);
                        result.map_err(|err| {
                            let message = err.to_string();
                            caller.data_mut().call.set_fault(err);
                            anyhow::anyhow!(message)
                        })
                    },
                )
                .map_err(|e| StrataError::WasmHostFunction {
                    function: qualified,
                    cause: e.to_string(),
                })?;
        }
        Ok(())
    }
}

fn invoke(
    caller: &mut Caller<'_, HostState>,
    extension: &dyn HostExtension,
    label: &str,
    ptr: i32,
    len: i32,
    out_ptr: i32,
) -> Result<()> {
    let bridge = MemoryBridge::from_caller(caller)?;
    let input = bridge.copy_from_wasm(&*caller, WasmPtr::from_raw(ptr, len))?;
    caller.data_mut().call.push_stack(label.to_string());
    let output = extension
        .call(caller.data().call.clock(), &input)
        .map_err(|e| StrataError::WasmHostFunction {
            function: label.to_string(),
            cause: e.to_string(),
        })?;
    bridge.return_bytes(&mut *caller, &output, out_ptr as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo(_: &Clock, input: &[u8]) -> Result<Vec<u8>> {
        Ok(input.to_vec())
    }

    #[test]
    fn reserved_namespaces_are_rejected() {
        let mut registry = ExtensionRegistry::new();
        for namespace in RESERVED_NAMESPACES {
            let err = registry.add(namespace, "f", echo).unwrap_err();
            assert_eq!(err.code(), "E705");
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn registers_by_namespace_and_function() {
        let mut registry = ExtensionRegistry::new();
        registry.add("rpc", "eth_call", echo).unwrap();
        registry.add("rpc", "eth_call", echo).unwrap();
        registry.add("rpc", "eth_balance", echo).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("rpc", "eth_call"));
        assert!(!registry.contains("state", "eth_call"));
    }
}
