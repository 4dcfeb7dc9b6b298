use super::{BlockRef, Clock, StoreDelta};

/// Message streamed back to a Tier-1 client.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Response {
    #[prost(oneof = "response::Message", tags = "1, 2, 3, 4")]
    pub message: Option<response::Message>,
}

pub mod response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Message {
        #[prost(message, tag = "1")]
        Session(super::SessionInit),
        #[prost(message, tag = "2")]
        BlockScopedData(super::BlockScopedData),
        #[prost(message, tag = "3")]
        BlockUndoSignal(super::BlockUndoSignal),
        #[prost(message, tag = "4")]
        Progress(super::ModulesProgress),
    }
}

/// First message of every Tier-1 stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SessionInit {
    #[prost(string, tag = "1")]
    pub trace_id: String,
    #[prost(uint64, tag = "2")]
    pub resolved_start_block: u64,
    #[prost(uint64, tag = "3")]
    pub linear_handoff_block: u64,
    #[prost(uint64, tag = "4")]
    pub max_parallel_workers: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlockScopedData {
    #[prost(message, optional, tag = "1")]
    pub output: Option<MapModuleOutput>,
    #[prost(message, optional, tag = "2")]
    pub clock: Option<Clock>,
    #[prost(string, tag = "3")]
    pub cursor: String,
    #[prost(uint64, tag = "4")]
    pub final_block_height: u64,
    #[prost(message, repeated, tag = "10")]
    pub debug_map_outputs: Vec<MapModuleOutput>,
    #[prost(message, repeated, tag = "11")]
    pub debug_store_outputs: Vec<StoreModuleOutput>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MapModuleOutput {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
    #[prost(bool, tag = "3")]
    pub cached: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StoreModuleOutput {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, repeated, tag = "2")]
    pub deltas: Vec<StoreDelta>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlockUndoSignal {
    #[prost(message, optional, tag = "1")]
    pub last_valid_block: Option<BlockRef>,
    #[prost(string, tag = "2")]
    pub last_valid_cursor: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ModulesProgress {
    #[prost(message, repeated, tag = "1")]
    pub stages: Vec<StageProgress>,
    #[prost(message, repeated, tag = "2")]
    pub modules: Vec<ModuleProgress>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StageProgress {
    #[prost(string, repeated, tag = "1")]
    pub modules: Vec<String>,
    #[prost(message, repeated, tag = "2")]
    pub completed_ranges: Vec<BlockRange>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ModuleProgress {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(uint64, tag = "2")]
    pub executed_blocks: u64,
    #[prost(uint64, tag = "3")]
    pub cached_blocks: u64,
    #[prost(uint64, tag = "4")]
    pub skipped_blocks: u64,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct BlockRange {
    #[prost(uint64, tag = "1")]
    pub start_block: u64,
    #[prost(uint64, tag = "2")]
    pub end_block: u64,
}

/// Message streamed back by a Tier-2 worker.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProcessRangeResponse {
    #[prost(oneof = "process_range_response::Type", tags = "1, 2, 3")]
    pub r#type: Option<process_range_response::Type>,
}

pub mod process_range_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Type {
        #[prost(message, tag = "1")]
        Progress(super::ModulesProgress),
        #[prost(message, tag = "2")]
        Completed(super::Completed),
        #[prost(message, tag = "3")]
        Failed(super::Failed),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Completed {
    #[prost(message, repeated, tag = "1")]
    pub processed_ranges: Vec<BlockRange>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Failed {
    #[prost(string, tag = "1")]
    pub reason: String,
    #[prost(string, repeated, tag = "2")]
    pub logs: Vec<String>,
    #[prost(bool, tag = "3")]
    pub logs_truncated: bool,
    /// Error code of the failure, e.g. `E302`.
    #[prost(string, tag = "4")]
    pub code: String,
    /// Block of a module fault.
    #[prost(uint64, optional, tag = "5")]
    pub failed_block: Option<u64>,
}
