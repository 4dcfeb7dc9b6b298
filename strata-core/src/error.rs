//! Error types for strata.
//!
//! Every error carries the identifiers needed to locate the failure (module
//! name, object name, block number) and a stable error code. Callers that need
//! to decide on retries or on the status to report use [`StrataError::kind`].

use thiserror::Error;

/// Coarse classification of an error, used for retry and status decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The request itself is malformed (graph cycle, unknown module, bad flags).
    InvalidRequest,
    /// A module misbehaved: panic, invalid store operation, limit exceeded.
    ModuleFault,
    /// Object storage failed; the operation may succeed on retry.
    StorageTransient,
    /// A remote worker failed; the job may succeed on retry.
    WorkerTransient,
    /// Anything that is neither retriable nor caused by the request.
    Fatal,
    /// The caller went away.
    Canceled,
    /// A deadline elapsed.
    DeadlineExceeded,
}

/// The main error type for strata operations.
#[derive(Error, Debug, Clone)]
pub enum StrataError {
    // =========================================================================
    // Request Errors (E100-E199)
    // =========================================================================
    /// Generic request validation failure.
    #[error("E101: Invalid request: {cause}")]
    InvalidRequest {
        /// What is wrong with the request.
        cause: String,
    },

    /// A referenced module does not exist in the package.
    #[error("E102: Module '{module}' not found")]
    ModuleNotFound {
        /// Name of the missing module.
        module: String,
    },

    /// The requested output module cannot be streamed.
    #[error("E103: Output module '{module}' must be a map module, got {kind}")]
    OutputNotMapper {
        /// Name of the output module.
        module: String,
        /// Declared kind of the module.
        kind: String,
    },

    /// Requested segment does not reach the first streamable block.
    #[error("E104: Segment {segment} ends at {end}, before first streamable block {first_streamable}")]
    SegmentBeforeFirstStreamable {
        /// Requested segment number.
        segment: u64,
        /// Exclusive end block of the segment.
        end: u64,
        /// First block the source can serve.
        first_streamable: u64,
    },

    // =========================================================================
    // Graph Errors (E200-E299)
    // =========================================================================
    /// Two modules share a name.
    #[error("E201: Duplicate module name '{module}'")]
    DuplicateModule {
        /// The duplicated name.
        module: String,
    },

    /// An input references a module that is not declared.
    #[error("E202: Module '{module}' references unknown input '{input}'")]
    UnknownInput {
        /// Module declaring the input.
        module: String,
        /// The unresolved reference.
        input: String,
    },

    /// The module graph is not acyclic.
    #[error("E203: Module graph contains a cycle through: {modules}")]
    ModuleCycle {
        /// Modules left over after topological sort.
        modules: String,
    },

    /// An input references a module of the wrong kind.
    #[error("E204: Module '{module}' has an invalid input '{input}': {cause}")]
    InvalidInput {
        /// Module declaring the input.
        module: String,
        /// The offending input.
        input: String,
        /// Why it is invalid.
        cause: String,
    },

    /// Start block is below the output module initial block.
    #[error("E205: Start block {start} is before initial block {initial} of module '{module}'")]
    StartBeforeInitialBlock {
        /// Module whose initial block was violated.
        module: String,
        /// Requested start block.
        start: u64,
        /// Module initial block.
        initial: u64,
    },

    // =========================================================================
    // Module Faults (E300-E399)
    // =========================================================================
    /// A store operation was rejected: policy, value type, key or size rules.
    #[error("E301: Store operation '{op}' failed in module '{module}': {reason}")]
    StoreOperation {
        /// Module owning the store.
        module: String,
        /// Operation name (e.g. `set`, `add_bigint`).
        op: String,
        /// Why the operation was rejected.
        reason: String,
    },

    /// The guest registered a panic before trapping.
    #[error("E302: Module '{module}' panicked at block {block}: {message} ({file}:{line}:{column})")]
    ModulePanic {
        /// Module that panicked.
        module: String,
        /// Block being processed.
        block: u64,
        /// Panic message.
        message: String,
        /// Source file reported by the guest.
        file: String,
        /// Line reported by the guest.
        line: u32,
        /// Column reported by the guest.
        column: u32,
    },

    /// Any other guest execution failure.
    #[error("E303: Module '{module}' failed at block {block}: {cause}")]
    ModuleExecution {
        /// Module that failed.
        module: String,
        /// Block being processed.
        block: u64,
        /// Failure description, including the recent host call stack.
        cause: String,
    },

    /// A request identical to a recently failing one was short-circuited.
    #[error("E304: Request previously failed at block {block}: {cause}")]
    PreviouslyFailed {
        /// Block at which the recorded failure happened.
        block: u64,
        /// The recorded error message.
        cause: String,
    },

    // =========================================================================
    // Store Errors (E400-E499)
    // =========================================================================
    /// Two stores with different policies or value types were combined.
    #[error("E401: Cannot merge store '{module}': {cause}")]
    StoreMerge {
        /// Store module name.
        module: String,
        /// Description of the incompatibility.
        cause: String,
    },

    /// A store snapshot could not be decoded.
    #[error("E402: Cannot decode store data for '{module}': {cause}")]
    StoreDecode {
        /// Store module name.
        module: String,
        /// Decoder error.
        cause: String,
    },

    /// A file name does not follow the segment naming scheme.
    #[error("E403: Invalid file name '{name}'")]
    InvalidFileName {
        /// Offending file name.
        name: String,
    },

    // =========================================================================
    // Storage Errors (E500-E599)
    // =========================================================================
    /// The object does not exist.
    #[error("E501: Object '{name}' not found")]
    ObjectNotFound {
        /// Object name relative to the store root.
        name: String,
    },

    /// A read, write, list or delete failed.
    #[error("E502: Storage {operation} failed for '{name}': {cause}")]
    Storage {
        /// Operation that failed.
        operation: &'static str,
        /// Object name or prefix.
        name: String,
        /// Underlying error.
        cause: String,
    },

    /// An object was read but its content is not valid.
    #[error("E503: Object '{name}' is corrupt: {cause}")]
    CorruptObject {
        /// Object name.
        name: String,
        /// Decoder error.
        cause: String,
    },

    // =========================================================================
    // Worker Errors (E600-E699)
    // =========================================================================
    /// A remote job failed in a way that may succeed on retry.
    #[error("E601: Worker failed on job {job}: {cause}")]
    WorkerTransient {
        /// Job identifier.
        job: String,
        /// Underlying error.
        cause: String,
    },

    /// A job kept failing after every retry.
    #[error("E602: Job {job} failed after {attempts} attempts: {cause}")]
    JobFailed {
        /// Job identifier.
        job: String,
        /// Number of attempts made.
        attempts: u32,
        /// Last error.
        cause: String,
    },

    /// The response stream to the client is closed.
    #[error("E603: Response stream closed: {cause}")]
    StreamClosed {
        /// Why sending failed.
        cause: String,
    },

    // =========================================================================
    // WASM Errors (E700-E799)
    // =========================================================================
    /// Failed to compile or instantiate a module binary.
    #[error("E701: Failed to load WASM for module '{module}': {cause}")]
    WasmLoad {
        /// Module name.
        module: String,
        /// Reason for the failure.
        cause: String,
    },

    /// Guest memory allocation or access failed.
    #[error("E702: WASM memory error in module '{module}': {cause}")]
    WasmMemory {
        /// Module name.
        module: String,
        /// Reason for the failure.
        cause: String,
    },

    /// Registering a host function failed.
    #[error("E703: Host function '{function}' error: {cause}")]
    WasmHostFunction {
        /// Host function name.
        function: String,
        /// Reason for the failure.
        cause: String,
    },

    /// Guest ran out of fuel.
    #[error("E704: Module '{module}' exceeded its execution budget at block {block}")]
    FuelExhausted {
        /// Module name.
        module: String,
        /// Block being processed.
        block: u64,
    },

    /// An extension tried to claim a namespace owned by the host.
    #[error("E705: Namespace '{namespace}' is reserved")]
    ReservedNamespace {
        /// The reserved namespace.
        namespace: String,
    },

    // =========================================================================
    // Configuration Errors (E800-E899)
    // =========================================================================
    /// A configuration value is invalid.
    #[error("E801: Invalid configuration value for '{field}': {cause}")]
    ConfigValue {
        /// Configuration field.
        field: String,
        /// Why the value is invalid.
        cause: String,
    },

    /// Message encoding or decoding failed.
    #[error("E802: Serialization error: {0}")]
    Serialization(String),

    // =========================================================================
    // Cancellation and Internal Errors (E900-E999)
    // =========================================================================
    /// The request was canceled.
    #[error("E901: Canceled: {cause}")]
    Canceled {
        /// What was running when cancellation was observed.
        cause: String,
    },

    /// A deadline elapsed.
    #[error("E902: Deadline exceeded: {cause}")]
    DeadlineExceeded {
        /// What timed out.
        cause: String,
    },

    /// An invariant was broken.
    #[error("E903: Internal error: {cause}")]
    Internal {
        /// Description.
        cause: String,
    },
}

impl StrataError {
    /// Get the error code (e.g., "E301").
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "E101",
            Self::ModuleNotFound { .. } => "E102",
            Self::OutputNotMapper { .. } => "E103",
            Self::SegmentBeforeFirstStreamable { .. } => "E104",
            Self::DuplicateModule { .. } => "E201",
            Self::UnknownInput { .. } => "E202",
            Self::ModuleCycle { .. } => "E203",
            Self::InvalidInput { .. } => "E204",
            Self::StartBeforeInitialBlock { .. } => "E205",
            Self::StoreOperation { .. } => "E301",
            Self::ModulePanic { .. } => "E302",
            Self::ModuleExecution { .. } => "E303",
            Self::PreviouslyFailed { .. } => "E304",
            Self::StoreMerge { .. } => "E401",
            Self::StoreDecode { .. } => "E402",
            Self::InvalidFileName { .. } => "E403",
            Self::ObjectNotFound { .. } => "E501",
            Self::Storage { .. } => "E502",
            Self::CorruptObject { .. } => "E503",
            Self::WorkerTransient { .. } => "E601",
            Self::JobFailed { .. } => "E602",
            Self::StreamClosed { .. } => "E603",
            Self::WasmLoad { .. } => "E701",
            Self::WasmMemory { .. } => "E702",
            Self::WasmHostFunction { .. } => "E703",
            Self::FuelExhausted { .. } => "E704",
            Self::ReservedNamespace { .. } => "E705",
            Self::ConfigValue { .. } => "E801",
            Self::Serialization(_) => "E802",
            Self::Canceled { .. } => "E901",
            Self::DeadlineExceeded { .. } => "E902",
            Self::Internal { .. } => "E903",
        }
    }

    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest { .. }
            | Self::ModuleNotFound { .. }
            | Self::OutputNotMapper { .. }
            | Self::SegmentBeforeFirstStreamable { .. }
            | Self::DuplicateModule { .. }
            | Self::UnknownInput { .. }
            | Self::ModuleCycle { .. }
            | Self::InvalidInput { .. }
            | Self::StartBeforeInitialBlock { .. }
            | Self::ReservedNamespace { .. }
            | Self::ConfigValue { .. } => ErrorKind::InvalidRequest,
            Self::StoreOperation { .. }
            | Self::ModulePanic { .. }
            | Self::ModuleExecution { .. }
            | Self::PreviouslyFailed { .. }
            | Self::WasmMemory { .. }
            | Self::FuelExhausted { .. } => ErrorKind::ModuleFault,
            Self::Storage { .. } => ErrorKind::StorageTransient,
            Self::WorkerTransient { .. } => ErrorKind::WorkerTransient,
            Self::Canceled { .. } => ErrorKind::Canceled,
            Self::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
            Self::StoreMerge { .. }
            | Self::StoreDecode { .. }
            | Self::InvalidFileName { .. }
            | Self::ObjectNotFound { .. }
            | Self::CorruptObject { .. }
            | Self::JobFailed { .. }
            | Self::StreamClosed { .. }
            | Self::WasmLoad { .. }
            | Self::WasmHostFunction { .. }
            | Self::Serialization(_)
            | Self::Internal { .. } => ErrorKind::Fatal,
        }
    }

    /// Check if this error is retriable.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::StorageTransient | ErrorKind::WorkerTransient
        )
    }

    /// Check if this error is a module fault that should be recorded against
    /// the request that produced it.
    #[must_use]
    pub fn is_module_fault(&self) -> bool {
        self.kind() == ErrorKind::ModuleFault
    }

    /// Block a module fault happened on.
    pub fn failed_block(&self) -> Option<u64> {
        match self {
            Self::ModulePanic { block, .. }
            | Self::ModuleExecution { block, .. }
            | Self::FuelExhausted { block, .. }
            | Self::PreviouslyFailed { block, .. } => Some(*block),
            _ => None,
        }
    }

    /// Shorthand for a rejected store operation.
    pub fn store_op(
        module: impl Into<String>,
        op: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::StoreOperation {
            module: module.into(),
            op: op.into(),
            reason: reason.into(),
        }
    }
}

impl From<prost::DecodeError> for StrataError {
    fn from(err: prost::DecodeError) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<prost::EncodeError> for StrataError {
    fn from(err: prost::EncodeError) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias using `StrataError`.
pub type Result<T> = std::result::Result<T, StrataError>;

/// Extension trait for adding context to errors.
pub trait ResultExt<T> {
    /// Wrap an error as a storage failure on `name`.
    fn storage_context(self, operation: &'static str, name: &str) -> Result<T>;

    /// Wrap an error as an internal failure with a message prefix.
    fn internal_context(self, context: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn storage_context(self, operation: &'static str, name: &str) -> Result<T> {
        self.map_err(|e| StrataError::Storage {
            operation,
            name: name.to_string(),
            cause: e.to_string(),
        })
    }

    fn internal_context(self, context: &str) -> Result<T> {
        self.map_err(|e| StrataError::Internal {
            cause: format!("{context}: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_correct() {
        let err = StrataError::ModuleCycle {
            modules: "a, b".to_string(),
        };
        assert_eq!(err.code(), "E203");

        let err = StrataError::store_op("s1", "append", "too big");
        assert_eq!(err.code(), "E301");
    }

    #[test]
    fn error_display() {
        let err = StrataError::ModulePanic {
            module: "map_pools".to_string(),
            block: 42,
            message: "index out of bounds".to_string(),
            file: "src/lib.rs".to_string(),
            line: 10,
            column: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("E302"));
        assert!(msg.contains("map_pools"));
        assert!(msg.contains("src/lib.rs:10:5"));
    }

    #[test]
    fn kinds_drive_retries() {
        let storage = StrataError::Storage {
            operation: "write",
            name: "0000000010-0000000000.kv".to_string(),
            cause: "timeout".to_string(),
        };
        assert_eq!(storage.kind(), ErrorKind::StorageTransient);
        assert!(storage.is_retriable());

        let fault = StrataError::store_op("s1", "set", "key is empty");
        assert_eq!(fault.kind(), ErrorKind::ModuleFault);
        assert!(fault.is_module_fault());
        assert!(!fault.is_retriable());

        let missing = StrataError::ObjectNotFound {
            name: "x".to_string(),
        };
        assert!(!missing.is_retriable());
    }

    #[test]
    fn request_errors_are_invalid_request() {
        let err = StrataError::OutputNotMapper {
            module: "s1".to_string(),
            kind: "store".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert_eq!(
            StrataError::Canceled {
                cause: "client".to_string()
            }
            .kind(),
            ErrorKind::Canceled
        );
    }

    #[test]
    fn storage_context_wraps_errors() {
        let res: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::other("disk full"));
        let err = res.storage_context("write", "a.kv").unwrap_err();
        assert!(matches!(err, StrataError::Storage { operation: "write", .. }));
        assert!(err.to_string().contains("disk full"));
    }
}
