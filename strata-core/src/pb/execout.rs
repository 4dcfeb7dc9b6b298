use prost_types::Timestamp;
use std::collections::HashMap;

/// One cached module output.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Item {
    #[prost(uint64, tag = "1")]
    pub block_num: u64,
    #[prost(string, tag = "2")]
    pub block_id: String,
    #[prost(bytes = "vec", tag = "3")]
    pub payload: Vec<u8>,
    #[prost(message, optional, tag = "4")]
    pub timestamp: Option<Timestamp>,
    #[prost(bool, tag = "5")]
    pub is_skipped: bool,
}

/// Content of an `.output` file, keyed by block id.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecOutputData {
    #[prost(map = "string, message", tag = "1")]
    pub kv: HashMap<String, Item>,
}
