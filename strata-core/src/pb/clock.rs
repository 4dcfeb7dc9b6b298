use prost_types::Timestamp;

/// Identifies a block: number, id and timestamp.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Clock {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(uint64, tag = "2")]
    pub number: u64,
    #[prost(message, optional, tag = "3")]
    pub timestamp: Option<Timestamp>,
}

impl Clock {
    /// Build a clock with a timestamp in whole seconds.
    pub fn new(number: u64, id: impl Into<String>, seconds: i64) -> Self {
        Self {
            id: id.into(),
            number,
            timestamp: Some(Timestamp { seconds, nanos: 0 }),
        }
    }

    /// Block reference (number and id) of this clock.
    pub fn block_ref(&self) -> BlockRef {
        BlockRef {
            id: self.id.clone(),
            number: self.number,
        }
    }
}

/// Number and id of a block, without its timestamp.
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct BlockRef {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(uint64, tag = "2")]
    pub number: u64,
}
