//! Block index files and block filters.
//!
//! Index modules emit a list of keys per block. Those keys are inverted into
//! `key -> bitmap of block numbers` and persisted per segment so that later
//! requests can skip, without executing anything, the blocks a filtered
//! module would ignore.

mod file;
mod query;

pub use file::{index_file_name, IndexFile};
pub use query::Expression;

use crate::error::Result;
use roaring::RoaringTreemap;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Accumulates the keys emitted by one index module and writes them out
/// when the stream ends.
#[derive(Debug)]
pub struct IndexWriter {
    file: IndexFile,
}

impl IndexWriter {
    /// Write into `file`.
    pub fn new(file: IndexFile) -> Self {
        Self { file }
    }

    /// Module name.
    pub fn module_name(&self) -> &str {
        self.file.module_name()
    }

    /// Record the keys emitted at `block_num`.
    pub fn write<S: AsRef<str>>(&mut self, keys: &[S], block_num: u64) {
        self.file.set(keys, block_num);
    }

    /// Persist the accumulated bitmaps.
    pub async fn close(self) -> Result<()> {
        debug!(module = %self.file.module_name(), range = %self.file.range(), "closing index writer");
        self.file.save().await
    }
}

/// The block filter of one module.
///
/// With precomputed bitmaps the decision only needs the block number;
/// otherwise the keys emitted in-block by the index module are evaluated.
#[derive(Debug, Clone)]
pub struct BlockIndex {
    expression: Expression,
    precomputed: Option<RoaringTreemap>,
}

impl BlockIndex {
    /// Parse `query`.
    pub fn new(query: &str) -> Result<Self> {
        Ok(Self {
            expression: Expression::parse(query)?,
            precomputed: None,
        })
    }

    /// Resolve the query once against an index file's bitmaps.
    pub fn with_precomputed(mut self, indices: &HashMap<String, RoaringTreemap>) -> Self {
        self.precomputed = Some(self.expression.apply(indices));
        self
    }

    /// Parsed query.
    pub fn expression(&self) -> &Expression {
        &self.expression
    }

    /// Whether the decision comes from an index file.
    pub fn is_precomputed(&self) -> bool {
        self.precomputed.is_some()
    }

    /// Whether the filtered module must run on `block_num`.
    ///
    /// `keys` are the index keys emitted for this block; `None` means the
    /// index module produced nothing, which never matches.
    pub fn matches(&self, block_num: u64, keys: Option<&[String]>) -> bool {
        if let Some(bitmap) = &self.precomputed {
            return bitmap.contains(block_num);
        }
        match keys {
            Some(keys) => {
                let set: HashSet<&str> = keys.iter().map(String::as_str).collect();
                self.expression.matches_keys(&set)
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precomputed_filter_uses_bitmap() {
        let mut indices = HashMap::new();
        indices.insert("a".to_string(), [5u64, 7].into_iter().collect::<RoaringTreemap>());
        let index = BlockIndex::new("a").unwrap().with_precomputed(&indices);

        assert!(index.is_precomputed());
        assert!(index.matches(5, None));
        assert!(!index.matches(6, Some(&["a".to_string()])));
    }

    #[test]
    fn in_block_filter_uses_keys() {
        let index = BlockIndex::new("a && b").unwrap();
        assert!(index.matches(1, Some(&["b".to_string(), "a".to_string()])));
        assert!(!index.matches(1, Some(&["a".to_string()])));
        assert!(!index.matches(1, None));
    }
}
