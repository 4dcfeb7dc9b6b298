//! Per-call host state.

use std::collections::VecDeque;
use std::sync::Arc;
use strata_core::error::StrataError;
use strata_core::pb::Clock;
use strata_core::store::StoreHandle;
use tracing::debug;
use wasmtime::StoreLimits;

/// Total bytes of guest log lines kept per call.
pub const MAX_LOG_BYTES: usize = 128 * 1024;

/// Number of recent host calls kept for failure reports.
pub const MAX_STACK_ENTRIES: usize = 16;

/// One argument of a module call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Argument {
    /// Value input, passed as `(ptr, len)`.
    Bytes(Vec<u8>),
    /// Store read access, passed as the index of the store among the call's
    /// readers.
    StoreReader(usize),
}

/// Panic details reported by the guest through `register_panic`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicInfo {
    /// Panic message.
    pub message: String,
    /// Source file.
    pub file: String,
    /// Source line.
    pub line: u32,
    /// Source column.
    pub column: u32,
}

impl PanicInfo {
    /// Typed error for this panic.
    pub fn into_error(self, module: &str, block: u64) -> StrataError {
        StrataError::ModulePanic {
            module: module.to_string(),
            block,
            message: self.message,
            file: self.file,
            line: self.line,
            column: self.column,
        }
    }
}

/// Everything a module call reads and produces.
///
/// Built by the pipeline before the call, moved into the Wasmtime store for
/// its duration and handed back once the instance is gone.
#[derive(Debug)]
pub struct Call {
    module: String,
    clock: Arc<Clock>,
    readers: Vec<StoreHandle>,
    writer: Option<StoreHandle>,
    output: Option<Vec<u8>>,
    logs: Vec<String>,
    log_bytes: usize,
    logs_truncated: bool,
    panic: Option<PanicInfo>,
    fault: Option<StrataError>,
    stack: VecDeque<String>,
}

impl Call {
    /// A call of `module` for the block of `clock`.
    pub fn new(module: impl Into<String>, clock: Arc<Clock>) -> Self {
        Self {
            module: module.into(),
            clock,
            readers: Vec::new(),
            writer: None,
            output: None,
            logs: Vec::new(),
            log_bytes: 0,
            logs_truncated: false,
            panic: None,
            fault: None,
            stack: VecDeque::new(),
        }
    }

    /// Give the call read access to a store; returns its reader index.
    pub fn add_reader(&mut self, store: StoreHandle) -> usize {
        self.readers.push(store);
        self.readers.len() - 1
    }

    /// Give the call write access to the module's own store.
    pub fn with_writer(mut self, store: StoreHandle) -> Self {
        self.writer = Some(store);
        self
    }

    /// Called module.
    pub fn module_name(&self) -> &str {
        &self.module
    }

    /// Clock of the block being processed.
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Number of the block being processed.
    pub fn block_num(&self) -> u64 {
        self.clock.number
    }

    /// Reader store at `index`.
    pub fn reader(&self, index: i32) -> Option<&StoreHandle> {
        usize::try_from(index).ok().and_then(|i| self.readers.get(i))
    }

    /// The module's own store.
    pub fn writer(&self) -> Option<&StoreHandle> {
        self.writer.as_ref()
    }

    /// Bytes passed to `output`, if any.
    pub fn output(&self) -> Option<&[u8]> {
        self.output.as_deref()
    }

    /// Take the bytes passed to `output`.
    pub fn take_output(&mut self) -> Vec<u8> {
        self.output.take().unwrap_or_default()
    }

    /// Guest log lines.
    pub fn logs(&self) -> &[String] {
        &self.logs
    }

    /// Whether log lines were dropped.
    pub fn logs_truncated(&self) -> bool {
        self.logs_truncated
    }

    /// Most recent host calls, oldest first.
    pub fn stack(&self) -> impl Iterator<Item = &str> {
        self.stack.iter().map(String::as_str)
    }

    pub(crate) fn set_output(&mut self, bytes: Vec<u8>) {
        self.output = Some(bytes);
    }

    pub(crate) fn log(&mut self, line: String) {
        if self.logs_truncated {
            return;
        }
        if self.log_bytes + line.len() > MAX_LOG_BYTES {
            self.logs_truncated = true;
            return;
        }
        debug!(target: "strata::wasm", module = %self.module, block_num = self.clock.number, "{line}");
        self.log_bytes += line.len();
        self.logs.push(line);
    }

    pub(crate) fn set_panic(&mut self, panic: PanicInfo) {
        self.panic = Some(panic);
    }

    pub(crate) fn take_panic(&mut self) -> Option<PanicInfo> {
        self.panic.take()
    }

    pub(crate) fn set_fault(&mut self, fault: StrataError) {
        if self.fault.is_none() {
            self.fault = Some(fault);
        }
    }

    pub(crate) fn take_fault(&mut self) -> Option<StrataError> {
        self.fault.take()
    }

    pub(crate) fn push_stack(&mut self, entry: String) {
        if self.stack.len() == MAX_STACK_ENTRIES {
            self.stack.pop_front();
        }
        self.stack.push_back(entry);
    }

    /// `cause` followed by the recent host calls.
    pub fn describe_failure(&self, cause: &str) -> String {
        if self.stack.is_empty() {
            return cause.to_string();
        }
        let stack: Vec<&str> = self.stack().collect();
        format!("{cause}; last host calls: {}", stack.join(" > "))
    }
}

/// Data of the Wasmtime store of one call.
pub struct HostState {
    /// The call.
    pub call: Call,
    /// Memory limits of the instance.
    pub limits: StoreLimits,
}
