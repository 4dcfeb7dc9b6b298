//! Memory bridge for WASM <-> host data transfer.
//!
//! Every transfer copies: guest memory is released with the instance at the
//! end of a call, so nothing the host keeps may borrow from it.

use super::call::HostState;
use strata_core::error::{Result, StrataError};
use wasmtime::{AsContext, AsContextMut, Caller, Extern, Instance, Memory, TypedFunc};

/// A pointer within WASM linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WasmPtr {
    /// Offset within WASM linear memory.
    pub offset: u32,
    /// Size of the data in bytes.
    pub size: u32,
}

impl WasmPtr {
    /// Create a new WASM pointer.
    pub const fn new(offset: u32, size: u32) -> Self {
        Self { offset, size }
    }

    /// Create a null pointer.
    pub const fn null() -> Self {
        Self { offset: 0, size: 0 }
    }

    /// Check if this is a null pointer.
    pub const fn is_null(&self) -> bool {
        self.offset == 0 && self.size == 0
    }

    /// Pointer from the raw `i32` pair of the guest ABI.
    pub fn from_raw(ptr: i32, len: i32) -> Self {
        Self::new(ptr as u32, len as u32)
    }

    /// Byte range covered by the pointer.
    pub fn span(&self) -> std::ops::Range<usize> {
        let start = self.offset as usize;
        start..start + self.size as usize
    }

    /// Little-endian `(ptr, len)` pair written to guest out-parameters.
    pub fn to_le_bytes(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&self.offset.to_le_bytes());
        out[4..].copy_from_slice(&self.size.to_le_bytes());
        out
    }
}

/// Guest memory plus its `alloc` export.
pub struct MemoryBridge {
    memory: Memory,
    alloc_fn: TypedFunc<i32, i32>,
    module: String,
}

impl MemoryBridge {
    /// Resolve the `memory` and `alloc` exports of an instance.
    pub fn from_instance(
        mut store: impl AsContextMut<Data = HostState>,
        instance: &Instance,
        module: &str,
    ) -> Result<Self> {
        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| missing_export(module, "memory"))?;
        let alloc_fn = instance
            .get_typed_func::<i32, i32>(&mut store, "alloc")
            .map_err(|e| StrataError::WasmLoad {
                module: module.to_string(),
                cause: format!("export 'alloc' is missing or has the wrong signature: {e}"),
            })?;
        Ok(Self {
            memory,
            alloc_fn,
            module: module.to_string(),
        })
    }

    /// Resolve the exports from inside a host function.
    pub fn from_caller(caller: &mut Caller<'_, HostState>) -> Result<Self> {
        let module = caller.data().call.module_name().to_string();
        let memory = match caller.get_export("memory") {
            Some(Extern::Memory(memory)) => memory,
            _ => return Err(missing_export(&module, "memory")),
        };
        let alloc_fn = match caller.get_export("alloc") {
            Some(Extern::Func(func)) => {
                func.typed::<i32, i32>(&*caller)
                    .map_err(|e| StrataError::WasmLoad {
                        module: module.clone(),
                        cause: format!("export 'alloc' has the wrong signature: {e}"),
                    })?
            }
            _ => return Err(missing_export(&module, "alloc")),
        };
        Ok(Self {
            memory,
            alloc_fn,
            module,
        })
    }

    /// Allocate `size` bytes through the guest allocator.
    pub fn allocate(&self, mut store: impl AsContextMut<Data = HostState>, size: u32) -> Result<u32> {
        self.alloc_fn
            .call(&mut store, size as i32)
            .map(|ptr| ptr as u32)
            .map_err(|e| self.error(format!("alloc({size}) failed: {e}")))
    }

    /// Copy `data` into freshly allocated guest memory.
    pub fn copy_to_wasm(
        &self,
        mut store: impl AsContextMut<Data = HostState>,
        data: &[u8],
    ) -> Result<WasmPtr> {
        if data.is_empty() {
            return Ok(WasmPtr::null());
        }
        let offset = self.allocate(&mut store, data.len() as u32)?;
        let ptr = WasmPtr::new(offset, data.len() as u32);
        self.write_at(&mut store, offset, data)?;
        Ok(ptr)
    }

    /// Copy the bytes at `ptr` out of guest memory.
    pub fn copy_from_wasm(&self, store: impl AsContext<Data = HostState>, ptr: WasmPtr) -> Result<Vec<u8>> {
        if ptr.size == 0 {
            return Ok(Vec::new());
        }
        self.memory
            .data(&store)
            .get(ptr.span())
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                self.error(format!(
                    "read out of bounds: offset={}, size={}",
                    ptr.offset, ptr.size
                ))
            })
    }

    /// Write `data` at `offset` without allocating.
    pub fn write_at(
        &self,
        mut store: impl AsContextMut<Data = HostState>,
        offset: u32,
        data: &[u8],
    ) -> Result<()> {
        let span = WasmPtr::new(offset, data.len() as u32).span();
        let dest = self
            .memory
            .data_mut(&mut store)
            .get_mut(span)
            .ok_or_else(|| {
                self.error(format!(
                    "write out of bounds: offset={offset}, size={}",
                    data.len()
                ))
            })?;
        dest.copy_from_slice(data);
        Ok(())
    }

    /// Copy `data` into guest memory and store its `(ptr, len)` at `out_ptr`.
    pub fn return_bytes(
        &self,
        mut store: impl AsContextMut<Data = HostState>,
        data: &[u8],
        out_ptr: u32,
    ) -> Result<()> {
        let ptr = self.copy_to_wasm(&mut store, data)?;
        self.write_at(&mut store, out_ptr, &ptr.to_le_bytes())
    }

    /// Current size of guest memory in bytes.
    pub fn size(&self, store: impl AsContext<Data = HostState>) -> usize {
        self.memory.data_size(&store)
    }

    fn error(&self, cause: String) -> StrataError {
        StrataError::WasmMemory {
            module: self.module.clone(),
            cause,
        }
    }
}

fn missing_export(module: &str, export: &str) -> StrataError {
    StrataError::WasmLoad {
        module: module.to_string(),
        cause: format!("export '{export}' is missing"),
    }
}
