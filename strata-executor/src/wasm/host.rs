//! Host function bindings for WASM modules.
//!
//! Three namespaces are provided:
//!
//! - `logger`: `println(ptr, len)`
//! - `env`: `output(ptr, len)`, `register_panic(msg_ptr, msg_len, file_ptr, file_len, line, col)`
//! - `state`: store writes (on the module's own store) and reads (on the
//!   stores passed as reader indices)
//!
//! A failing import records a typed error in the call and traps; the runtime
//! reports the recorded error rather than the trap.

use super::call::{HostState, PanicInfo};
use super::memory::{MemoryBridge, WasmPtr};
use strata_core::error::{Result, StrataError};
use strata_core::store::{BaseStore, Numeric, NumericType, StoreHandle};
use wasmtime::{Caller, Linker};

/// Namespaces owned by the host; extensions cannot use them.
pub const RESERVED_NAMESPACES: [&str; 3] = ["state", "env", "logger"];

/// Register every built-in import with a linker.
pub fn register_host_functions(linker: &mut Linker<HostState>) -> Result<()> {
    register_logging_functions(linker)?;
    register_output_functions(linker)?;
    register_write_functions(linker)?;
    register_read_functions(linker)?;
    Ok(())
}

/// A store mutation, as exposed to guests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOp {
    Set,
    SetIfNotExists,
    Append,
    SetSum(Option<NumericType>),
    Add(NumericType),
    Min(NumericType),
    Max(NumericType),
}

/// Value argument of a write import.
enum WriteValue {
    Bytes(Vec<u8>),
    Number(Numeric),
}

impl WriteOp {
    fn apply(self, name: &str, store: &mut BaseStore, ord: u64, key: &[u8], value: WriteValue) -> Result<()> {
        let bytes = |value: WriteValue| match value {
            WriteValue::Bytes(bytes) => bytes,
            WriteValue::Number(n) => n.to_bytes(),
        };
        let number = |store: &BaseStore, ty: NumericType, value: WriteValue| match value {
            WriteValue::Number(n) => Ok(n),
            WriteValue::Bytes(raw) => Numeric::parse(ty, &raw).ok_or_else(|| {
                StrataError::store_op(
                    store.name(),
                    name,
                    format!("cannot parse '{}' as {ty}", String::from_utf8_lossy(&raw)),
                )
            }),
        };

        match self {
            Self::Set => store.set(ord, key, &bytes(value)),
            Self::SetIfNotExists => store.set_if_not_exists(ord, key, &bytes(value)),
            Self::Append => store.append(ord, key, &bytes(value)),
            Self::SetSum(ty) => {
                if let Some(ty) = ty {
                    if store.config().value_type().numeric() != Some(ty) {
                        return Err(StrataError::store_op(
                            store.name(),
                            name,
                            format!(
                                "store value type is '{}', operation requires '{ty}'",
                                store.config().value_type()
                            ),
                        ));
                    }
                }
                store.set_sum(ord, key, &bytes(value))
            }
            Self::Add(ty) => {
                let n = number(&*store, ty, value)?;
                store.add(ord, key, n)
            }
            Self::Min(ty) => {
                let n = number(&*store, ty, value)?;
                store.set_min(ord, key, n)
            }
            Self::Max(ty) => {
                let n = number(&*store, ty, value)?;
                store.set_max(ord, key, n)
            }
        }
    }
}

/// Imports taking `(ord, key_ptr, key_len, value_ptr, value_len)`.
const BYTES_WRITES: [(&str, WriteOp); 18] = [
    ("set", WriteOp::Set),
    ("set_if_not_exists", WriteOp::SetIfNotExists),
    ("append", WriteOp::Append),
    ("set_sum", WriteOp::SetSum(None)),
    ("set_sum_int64", WriteOp::SetSum(Some(NumericType::Int64))),
    ("set_sum_float64", WriteOp::SetSum(Some(NumericType::Float64))),
    ("set_sum_bigint", WriteOp::SetSum(Some(NumericType::BigInt))),
    ("set_sum_bigdecimal", WriteOp::SetSum(Some(NumericType::BigDecimal))),
    ("add_bigint", WriteOp::Add(NumericType::BigInt)),
    ("add_bigdecimal", WriteOp::Add(NumericType::BigDecimal)),
    ("add_bigfloat", WriteOp::Add(NumericType::BigDecimal)),
    ("set_min_bigint", WriteOp::Min(NumericType::BigInt)),
    ("set_max_bigint", WriteOp::Max(NumericType::BigInt)),
    ("set_min_bigdecimal", WriteOp::Min(NumericType::BigDecimal)),
    ("set_max_bigdecimal", WriteOp::Max(NumericType::BigDecimal)),
    ("set_min_bigfloat", WriteOp::Min(NumericType::BigDecimal)),
    ("set_max_bigfloat", WriteOp::Max(NumericType::BigDecimal)),
    ("set_sum_bigfloat", WriteOp::SetSum(Some(NumericType::BigDecimal))),
];

/// Imports taking `(ord, key_ptr, key_len, value: i64)`.
const INT64_WRITES: [(&str, WriteOp); 3] = [
    ("add_int64", WriteOp::Add(NumericType::Int64)),
    ("set_min_int64", WriteOp::Min(NumericType::Int64)),
    ("set_max_int64", WriteOp::Max(NumericType::Int64)),
];

/// Imports taking `(ord, key_ptr, key_len, value: f64)`.
const FLOAT64_WRITES: [(&str, WriteOp); 3] = [
    ("add_float64", WriteOp::Add(NumericType::Float64)),
    ("set_min_float64", WriteOp::Min(NumericType::Float64)),
    ("set_max_float64", WriteOp::Max(NumericType::Float64)),
];

fn link_error(function: &str, e: impl std::fmt::Display) -> StrataError {
    StrataError::WasmHostFunction {
        function: function.to_string(),
        cause: e.to_string(),
    }
}

/// Record `err` in the call and turn it into a trap.
fn fail(caller: &mut Caller<'_, HostState>, err: StrataError) -> anyhow::Error {
    let message = err.to_string();
    caller.data_mut().call.set_fault(err);
    anyhow::anyhow!(message)
}

fn guard<T>(caller: &mut Caller<'_, HostState>, result: Result<T>) -> anyhow::Result<T> {
    result.map_err(|e| fail(caller, e))
}

fn read_guest(caller: &mut Caller<'_, HostState>, ptr: i32, len: i32) -> Result<Vec<u8>> {
    let bridge = MemoryBridge::from_caller(caller)?;
    bridge.copy_from_wasm(&*caller, WasmPtr::from_raw(ptr, len))
}

fn ordinal(caller: &Caller<'_, HostState>, op: &str, ord: i64) -> Result<u64> {
    u64::try_from(ord).map_err(|_| {
        StrataError::store_op(caller.data().call.module_name(), op, format!("negative ordinal {ord}"))
    })
}

fn writer(caller: &Caller<'_, HostState>, op: &str) -> Result<StoreHandle> {
    let call = &caller.data().call;
    call.writer().cloned().ok_or_else(|| {
        StrataError::store_op(call.module_name(), op, "module does not own a store")
    })
}

fn reader(caller: &Caller<'_, HostState>, op: &str, index: i32) -> Result<StoreHandle> {
    let call = &caller.data().call;
    call.reader(index).cloned().ok_or_else(|| {
        StrataError::store_op(
            call.module_name(),
            op,
            format!("store index {index} is out of range"),
        )
    })
}

fn write(
    caller: &mut Caller<'_, HostState>,
    name: &str,
    op: WriteOp,
    ord: i64,
    key: (i32, i32),
    value: WriteValue,
) -> anyhow::Result<()> {
    let key = read_guest(caller, key.0, key.1);
    let key = guard(caller, key)?;
    caller
        .data_mut()
        .call
        .push_stack(format!("{name}({})", String::from_utf8_lossy(&key)));

    let ord = ordinal(caller, name, ord);
    let ord = guard(caller, ord)?;
    let handle = writer(caller, name);
    let handle = guard(caller, handle)?;
    let result = {
        let mut store = handle.lock();
        op.apply(name, &mut store, ord, &key, value)
    };
    guard(caller, result)
}

fn register_logging_functions(linker: &mut Linker<HostState>) -> Result<()> {
    linker
        .func_wrap(
            "logger",
            "println",
            |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> anyhow::Result<()> {
                let bytes = read_guest(&mut caller, ptr, len);
                let bytes = guard(&mut caller, bytes)?;
                caller
                    .data_mut()
                    .call
                    .log(String::from_utf8_lossy(&bytes).into_owned());
                Ok(())
            },
        )
        .map_err(|e| link_error("println", e))?;
    Ok(())
}

fn register_output_functions(linker: &mut Linker<HostState>) -> Result<()> {
    linker
        .func_wrap(
            "env",
            "output",
            |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> anyhow::Result<()> {
                let bytes = read_guest(&mut caller, ptr, len);
                let bytes = guard(&mut caller, bytes)?;
                caller.data_mut().call.set_output(bytes);
                Ok(())
            },
        )
        .map_err(|e| link_error("output", e))?;

    linker
        .func_wrap(
            "env",
            "register_panic",
            |mut caller: Caller<'_, HostState>,
             msg_ptr: i32,
             msg_len: i32,
             file_ptr: i32,
             file_len: i32,
             line: i32,
             column: i32|
             -> anyhow::Result<()> {
                let message = read_guest(&mut caller, msg_ptr, msg_len);
                let message = guard(&mut caller, message)?;
                let file = read_guest(&mut caller, file_ptr, file_len);
                let file = guard(&mut caller, file)?;
                caller.data_mut().call.set_panic(PanicInfo {
                    message: String::from_utf8_lossy(&message).into_owned(),
                    file: String::from_utf8_lossy(&file).into_owned(),
                    line: line as u32,
                    column: column as u32,
                });
                Ok(())
            },
        )
        .map_err(|e| link_error("register_panic", e))?;
    Ok(())
}

fn register_write_functions(linker: &mut Linker<HostState>) -> Result<()> {
    for (name, op) in BYTES_WRITES {
        linker
            .func_wrap(
                "state",
                name,
                move |mut caller: Caller<'_, HostState>,
                      ord: i64,
                      key_ptr: i32,
                      key_len: i32,
                      value_ptr: i32,
                      value_len: i32|
                      -> anyhow::Result<()> {
                    let value = read_guest(&mut caller, value_ptr, value_len);
                    let value = guard(&mut caller, value)?;
                    write(&mut caller, name, op, ord, (key_ptr, key_len), WriteValue::Bytes(value))
                },
            )
            .map_err(|e| link_error(name, e))?;
    }

    for (name, op) in INT64_WRITES {
        linker
            .func_wrap(
                "state",
                name,
                move |mut caller: Caller<'_, HostState>,
                      ord: i64,
                      key_ptr: i32,
                      key_len: i32,
                      value: i64|
                      -> anyhow::Result<()> {
                    let value = WriteValue::Number(Numeric::Int64(value));
                    write(&mut caller, name, op, ord, (key_ptr, key_len), value)
                },
            )
            .map_err(|e| link_error(name, e))?;
    }

    for (name, op) in FLOAT64_WRITES {
        linker
            .func_wrap(
                "state",
                name,
                move |mut caller: Caller<'_, HostState>,
                      ord: i64,
                      key_ptr: i32,
                      key_len: i32,
                      value: f64|
                      -> anyhow::Result<()> {
                    let value = WriteValue::Number(Numeric::Float64(value));
                    write(&mut caller, name, op, ord, (key_ptr, key_len), value)
                },
            )
            .map_err(|e| link_error(name, e))?;
    }

    linker
        .func_wrap(
            "state",
            "delete_prefix",
            |mut caller: Caller<'_, HostState>,
             ord: i64,
             prefix_ptr: i32,
             prefix_len: i32|
             -> anyhow::Result<()> {
                let prefix = read_guest(&mut caller, prefix_ptr, prefix_len);
                let prefix = guard(&mut caller, prefix)?;
                caller
                    .data_mut()
                    .call
                    .push_stack(format!("delete_prefix({})", String::from_utf8_lossy(&prefix)));
                let ord = ordinal(&caller, "delete_prefix", ord);
                let ord = guard(&mut caller, ord)?;
                let handle = writer(&caller, "delete_prefix");
                let handle = guard(&mut caller, handle)?;
                let result = handle.lock().delete_prefix(ord, &prefix);
                guard(&mut caller, result)
            },
        )
        .map_err(|e| link_error("delete_prefix", e))?;
    Ok(())
}

/// Which view of a store a read import uses.
#[derive(Debug, Clone, Copy)]
enum ReadAt {
    First,
    Last,
    Ordinal(u64),
}

/// Resolve a read import: the value of `key` in reader `index`, copied out
/// of the store.
fn read_store(
    caller: &mut Caller<'_, HostState>,
    name: &str,
    index: i32,
    at: ReadAt,
    key: (i32, i32),
) -> anyhow::Result<Option<Vec<u8>>> {
    let key = read_guest(caller, key.0, key.1);
    let key = guard(caller, key)?;
    let key = match String::from_utf8(key) {
        Ok(key) => key,
        Err(_) => {
            let err = StrataError::store_op(caller.data().call.module_name(), name, "key is not valid UTF-8");
            return Err(fail(caller, err));
        }
    };
    caller.data_mut().call.push_stack(format!("{name}({key})"));

    let handle = reader(caller, name, index);
    let handle = guard(caller, handle)?;
    let store = handle.lock();
    let value = match at {
        ReadAt::First => store.get_first(&key),
        ReadAt::Last => store.get_last(&key),
        ReadAt::Ordinal(ord) => store.get_at(ord, &key),
    };
    Ok(value.map(<[u8]>::to_vec))
}

/// Hand a found value back to the guest through `out_ptr`.
fn return_value(caller: &mut Caller<'_, HostState>, value: Option<Vec<u8>>, out_ptr: i32) -> anyhow::Result<i32> {
    let Some(value) = value else {
        return Ok(0);
    };
    let bridge = MemoryBridge::from_caller(caller);
    let bridge = guard(caller, bridge)?;
    let written = bridge.return_bytes(&mut *caller, &value, out_ptr as u32);
    guard(caller, written)?;
    Ok(1)
}

fn register_read_functions(linker: &mut Linker<HostState>) -> Result<()> {
    linker
        .func_wrap(
            "state",
            "get_at",
            |mut caller: Caller<'_, HostState>,
             index: i32,
             ord: i64,
             key_ptr: i32,
             key_len: i32,
             out_ptr: i32|
             -> anyhow::Result<i32> {
                let ord = ordinal(&caller, "get_at", ord);
                let ord = guard(&mut caller, ord)?;
                let value = read_store(&mut caller, "get_at", index, ReadAt::Ordinal(ord), (key_ptr, key_len))?;
                return_value(&mut caller, value, out_ptr)
            },
        )
        .map_err(|e| link_error("get_at", e))?;

    linker
        .func_wrap(
            "state",
            "has_at",
            |mut caller: Caller<'_, HostState>,
             index: i32,
             ord: i64,
             key_ptr: i32,
             key_len: i32|
             -> anyhow::Result<i32> {
                let ord = ordinal(&caller, "has_at", ord);
                let ord = guard(&mut caller, ord)?;
                let value = read_store(&mut caller, "has_at", index, ReadAt::Ordinal(ord), (key_ptr, key_len))?;
                Ok(i32::from(value.is_some()))
            },
        )
        .map_err(|e| link_error("has_at", e))?;

    for (name, at) in [("get_first", ReadAt::First), ("get_last", ReadAt::Last)] {
        linker
            .func_wrap(
                "state",
                name,
                move |mut caller: Caller<'_, HostState>,
                      index: i32,
                      key_ptr: i32,
                      key_len: i32,
                      out_ptr: i32|
                      -> anyhow::Result<i32> {
                    let value = read_store(&mut caller, name, index, at, (key_ptr, key_len))?;
                    return_value(&mut caller, value, out_ptr)
                },
            )
            .map_err(|e| link_error(name, e))?;
    }

    for (name, at) in [("has_first", ReadAt::First), ("has_last", ReadAt::Last)] {
        linker
            .func_wrap(
                "state",
                name,
                move |mut caller: Caller<'_, HostState>,
                      index: i32,
                      key_ptr: i32,
                      key_len: i32|
                      -> anyhow::Result<i32> {
                    let value = read_store(&mut caller, name, index, at, (key_ptr, key_len))?;
                    Ok(i32::from(value.is_some()))
                },
            )
            .map_err(|e| link_error(name, e))?;
    }
    Ok(())
}
