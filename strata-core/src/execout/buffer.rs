use crate::pb::Clock;
use crate::types::Block;
use prost::Message;
use std::collections::HashMap;

/// Input name under which the marshalled clock is exposed to modules.
pub const CLOCK_TYPE: &str = "strata.v1.Clock";

/// Outputs produced while processing one block.
///
/// Seeded with the block payload (under the block type) and the marshalled
/// clock, then filled module by module. A `None` value marks a module that
/// was skipped for this block.
#[derive(Debug, Clone)]
pub struct ExecOutputBuffer {
    clock: Clock,
    values: HashMap<String, Option<Vec<u8>>>,
}

impl ExecOutputBuffer {
    /// Buffer for `block`, whose payload is exposed as `block_type`.
    pub fn new(block_type: &str, block: &Block) -> Self {
        let mut values = HashMap::new();
        values.insert(block_type.to_string(), Some(block.payload.clone()));
        values.insert(CLOCK_TYPE.to_string(), Some(block.clock.encode_to_vec()));
        Self {
            clock: block.clock.clone(),
            values,
        }
    }

    /// Clock of the block being processed.
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Output of `name`. `None` when it is missing or was skipped.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.values.get(name).and_then(|v| v.as_deref())
    }

    /// Whether `name` produced an entry, skipped or not.
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Whether `name` was skipped for this block.
    pub fn is_skipped(&self, name: &str) -> bool {
        matches!(self.values.get(name), Some(None))
    }

    /// Record the output of `name`.
    pub fn set(&mut self, name: &str, value: Vec<u8>) {
        self.values.insert(name.to_string(), Some(value));
    }

    /// Record that `name` did not run on this block.
    pub fn set_skipped(&mut self, name: &str) {
        self.values.insert(name.to_string(), None);
    }
}
