//! WASM host for module binaries.
//!
//! # Architecture
//!
//! - **WasmRuntime**: Wasmtime engine, linker and compiled-module cache
//! - **Call**: Per-call state (store handles, output, logs, panic, recent host calls)
//! - **MemoryBridge**: Copies between host memory and guest linear memory
//! - **ExtensionRegistry**: Additional namespaced imports
//!
//! # Module ABI Contract
//!
//! Modules must export:
//!
//! ```text
//! memory: Memory
//! alloc(size: i32) -> i32
//! dealloc(ptr: i32, size: i32)
//! <entrypoint>(args...)          // (ptr, len) per value input, i32 per store reader
//! ```
//!
//! Modules can import:
//!
//! ```text
//! logger.println(ptr, len)
//! env.output(ptr, len)
//! env.register_panic(msg_ptr, msg_len, file_ptr, file_len, line, col)
//!
//! state.set(ord: i64, key_ptr, key_len, value_ptr, value_len)
//!   ... set_if_not_exists, append, set_sum[_int64|_float64|_bigint|_bigdecimal|_bigfloat],
//!   ... add_bigint, add_bigdecimal, add_bigfloat, set_min_/set_max_{bigint,bigdecimal,bigfloat}
//! state.add_int64(ord, key_ptr, key_len, value: i64)      // also set_min_int64, set_max_int64
//! state.add_float64(ord, key_ptr, key_len, value: f64)    // also set_min_float64, set_max_float64
//! state.delete_prefix(ord, prefix_ptr, prefix_len)
//!
//! state.get_at(store_idx, ord: i64, key_ptr, key_len, out_ptr) -> i32
//! state.get_first(store_idx, key_ptr, key_len, out_ptr) -> i32   // also get_last
//! state.has_at(store_idx, ord: i64, key_ptr, key_len) -> i32
//! state.has_first(store_idx, key_ptr, key_len) -> i32            // also has_last
//! ```
//!
//! Reads return `1` when the key is found, after writing the little-endian
//! `(ptr, len)` of a guest allocation holding the value at `out_ptr`.

mod call;
mod extension;
mod host;
mod memory;
mod runtime;

pub use call::{Argument, Call, HostState, PanicInfo, MAX_LOG_BYTES, MAX_STACK_ENTRIES};
pub use extension::{ExtensionRegistry, HostExtension};
pub use host::{register_host_functions, RESERVED_NAMESPACES};
pub use memory::{MemoryBridge, WasmPtr};
pub use runtime::{CompiledModule, WasmRuntime, WasmRuntimeConfig, DEFAULT_FUEL};
