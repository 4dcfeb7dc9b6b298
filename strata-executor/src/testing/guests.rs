//! WAT guest programs and packages built from them.

use crate::manifest::{Binary, Input, Module, Package};
use strata_core::store::{UpdatePolicy, ValueType};

/// Block type the test packages consume.
pub const BLOCK_TYPE: &str = "test.Block";

/// One guest binary exporting every test entrypoint.
///
/// - `map_echo(block)` outputs the block payload.
/// - `store_count(block)` adds 1 under `count`.
/// - `store_last(block)` sets `last` to the block payload.
/// - `store_append(block)` appends the block payload to `log`.
/// - `map_count(block, store)` outputs the last value of `count`, or
///   nothing when it is unset.
/// - `map_panic(block)` registers a panic and traps.
/// - `map_spin(block)` loops forever.
pub const GUEST_WAT: &str = r#"(module
  (import "env" "output" (func $output (param i32 i32)))
  (import "env" "register_panic" (func $register_panic (param i32 i32 i32 i32 i32 i32)))
  (import "state" "add_int64" (func $add_int64 (param i64 i32 i32 i64)))
  (import "state" "set" (func $set (param i64 i32 i32 i32 i32)))
  (import "state" "append" (func $append (param i64 i32 i32 i32 i32)))
  (import "state" "get_last" (func $get_last (param i32 i32 i32 i32) (result i32)))
  (memory (export "memory") 1)
  (data (i32.const 16) "count")
  (data (i32.const 32) "boom")
  (data (i32.const 40) "main.rs")
  (data (i32.const 48) "last")
  (data (i32.const 56) "log")
  (global $bump (mut i32) (i32.const 4096))

  (func (export "alloc") (param $size i32) (result i32)
    (local $ptr i32)
    global.get $bump
    local.set $ptr
    global.get $bump
    local.get $size
    i32.add
    global.set $bump
    local.get $ptr)

  (func (export "map_echo") (param $ptr i32) (param $len i32)
    local.get $ptr
    local.get $len
    call $output)

  (func (export "store_count") (param $ptr i32) (param $len i32)
    i64.const 0
    i32.const 16
    i32.const 5
    i64.const 1
    call $add_int64)

  (func (export "store_last") (param $ptr i32) (param $len i32)
    i64.const 0
    i32.const 48
    i32.const 4
    local.get $ptr
    local.get $len
    call $set)

  (func (export "store_append") (param $ptr i32) (param $len i32)
    i64.const 0
    i32.const 56
    i32.const 3
    local.get $ptr
    local.get $len
    call $append)

  (func (export "map_count") (param $ptr i32) (param $len i32) (param $store i32)
    local.get $store
    i32.const 16
    i32.const 5
    i32.const 64
    call $get_last
    if
      i32.const 64
      i32.load
      i32.const 68
      i32.load
      call $output
    end)

  (func (export "map_panic") (param $ptr i32) (param $len i32)
    i32.const 32
    i32.const 4
    i32.const 40
    i32.const 7
    i32.const 7
    i32.const 3
    call $register_panic
    unreachable)

  (func (export "map_spin") (param $ptr i32) (param $len i32)
    (loop $forever
      br $forever)))
"#;

/// The compiled guest.
pub fn guest_binary() -> Binary {
    let wasm = wat::parse_str(GUEST_WAT).unwrap_or_else(|e| panic!("test guest does not assemble: {e}"));
    Binary::wasm(wasm)
}

/// `map_echo` alone, starting at `initial_block`.
pub fn echo_package(initial_block: u64) -> Package {
    Package::new().with_binary(guest_binary()).with_module(
        Module::map("map_echo")
            .with_input(Input::source(BLOCK_TYPE))
            .with_initial_block(initial_block),
    )
}

/// `store_count` feeding `map_count`, both starting at `initial_block`.
pub fn counter_package(initial_block: u64) -> Package {
    Package::new()
        .with_binary(guest_binary())
        .with_module(
            Module::store("store_count", UpdatePolicy::Add, ValueType::Int64)
                .with_input(Input::source(BLOCK_TYPE))
                .with_initial_block(initial_block),
        )
        .with_module(
            Module::map("map_count")
                .with_input(Input::source(BLOCK_TYPE))
                .with_input(Input::store_get("store_count"))
                .with_initial_block(initial_block),
        )
}

/// [`counter_package`] plus `store_last` and `map_echo`.
pub fn full_package(initial_block: u64) -> Package {
    counter_package(initial_block)
        .with_module(
            Module::store("store_last", UpdatePolicy::Set, ValueType::String)
                .with_input(Input::source(BLOCK_TYPE))
                .with_initial_block(initial_block),
        )
        .with_module(
            Module::map("map_echo")
                .with_input(Input::source(BLOCK_TYPE))
                .with_initial_block(initial_block),
        )
}

/// `store_log` appending every block payload, read by `map_log`.
pub fn append_package(initial_block: u64) -> Package {
    Package::new()
        .with_binary(guest_binary())
        .with_module(
            Module::store("store_log", UpdatePolicy::Append, ValueType::Bytes)
                .with_entrypoint("store_append")
                .with_input(Input::source(BLOCK_TYPE))
                .with_initial_block(initial_block),
        )
        .with_module(
            Module::map("map_log")
                .with_entrypoint("map_count")
                .with_input(Input::source(BLOCK_TYPE))
                .with_input(Input::store_get("store_log"))
                .with_initial_block(initial_block),
        )
}

/// `map_panic` alone.
pub fn panic_package(initial_block: u64) -> Package {
    Package::new().with_binary(guest_binary()).with_module(
        Module::map("map_panic")
            .with_input(Input::source(BLOCK_TYPE))
            .with_initial_block(initial_block),
    )
}

/// `map_spin` alone.
pub fn spin_package(initial_block: u64) -> Package {
    Package::new().with_binary(guest_binary()).with_module(
        Module::map("map_spin")
            .with_input(Input::source(BLOCK_TYPE))
            .with_initial_block(initial_block),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::OutputGraph;

    #[test]
    fn guest_assembles() {
        assert!(!guest_binary().content.is_empty());
    }

    #[test]
    fn append_package_resolves() {
        let graph = OutputGraph::new(&append_package(0), "map_log", true).unwrap();
        assert_eq!(graph.stores().len(), 1);
        assert_eq!(graph.schedulable_modules().len(), 2);
    }

    #[test]
    fn counter_package_resolves() {
        let graph = OutputGraph::new(&counter_package(5), "map_count", false).unwrap();
        assert_eq!(graph.stores().len(), 1);
        assert_eq!(graph.lowest_initial_block(), 5);
    }
}
