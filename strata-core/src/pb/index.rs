use std::collections::HashMap;

/// Keys emitted by a block index module for one block.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IndexKeys {
    #[prost(string, repeated, tag = "1")]
    pub keys: Vec<String>,
}

/// Content of an `.index` file: serialized bitmap of block numbers per key.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IndexData {
    #[prost(map = "string, bytes", tag = "1")]
    pub indexes: HashMap<String, Vec<u8>>,
}
