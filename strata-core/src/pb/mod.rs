//! Protobuf messages persisted to object storage and streamed to clients.
//!
//! The messages are declared by hand with `prost` derives; field tags are part
//! of the on-disk and on-wire format and must never change.

#![allow(missing_docs)]

mod clock;
mod execout;
mod index;
mod store;
mod stream;

pub use clock::{BlockRef, Clock};
pub use execout::{ExecOutputData, Item};
pub use index::{IndexData, IndexKeys};
pub use store::{store_delta, StoreData, StoreDelta, StoreDeltas};
pub use stream::{
    process_range_response, response, BlockRange as PbBlockRange, BlockScopedData,
    BlockUndoSignal, Completed, Failed, MapModuleOutput, ModuleProgress, ModulesProgress,
    ProcessRangeResponse, Response, SessionInit, StageProgress, StoreModuleOutput,
};
