use std::collections::HashMap;

/// Persisted form of a store: the key/value snapshot plus, for partial
/// stores, the prefixes deleted during the segment.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StoreData {
    #[prost(map = "string, bytes", tag = "1")]
    pub kv: HashMap<String, Vec<u8>>,
    #[prost(string, repeated, tag = "2")]
    pub delete_prefixes: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StoreDeltas {
    #[prost(message, repeated, tag = "1")]
    pub deltas: Vec<StoreDelta>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StoreDelta {
    #[prost(enumeration = "store_delta::Operation", tag = "1")]
    pub operation: i32,
    #[prost(uint64, tag = "2")]
    pub ordinal: u64,
    #[prost(string, tag = "3")]
    pub key: String,
    #[prost(bytes = "vec", tag = "4")]
    pub old_value: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub new_value: Vec<u8>,
}

pub mod store_delta {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Operation {
        Unset = 0,
        Create = 1,
        Update = 2,
        Delete = 3,
    }
}

impl StoreDelta {
    /// Decoded operation; unknown values read as `Unset`.
    pub fn op(&self) -> store_delta::Operation {
        store_delta::Operation::try_from(self.operation).unwrap_or(store_delta::Operation::Unset)
    }
}
