use super::config::output_file_name;
use crate::block::{next_boundary, BlockRange};
use crate::error::{Result, StrataError};
use crate::pb::{Clock, ExecOutputData, Item};
use crate::storage::{retry, ObjectStore, RetryConfig};
use prost::Message;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Cached outputs of one module over one segment, keyed by block id.
pub struct ExecOutputFile {
    module_name: String,
    range: BlockRange,
    interval: u64,
    upper_bound: u64,
    kv: HashMap<String, Item>,
    object_store: Arc<dyn ObjectStore>,
}

impl ExecOutputFile {
    pub(crate) fn new(
        module_name: String,
        range: BlockRange,
        interval: u64,
        upper_bound: u64,
        object_store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            module_name,
            range,
            interval,
            upper_bound,
            kv: HashMap::new(),
            object_store,
        }
    }

    /// Module name.
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Covered range.
    pub fn range(&self) -> BlockRange {
        self.range
    }

    /// Object name relative to `{hash}/outputs`.
    pub fn filename(&self) -> String {
        output_file_name(&self.range)
    }

    /// Number of cached items.
    pub fn len(&self) -> usize {
        self.kv.len()
    }

    /// True when no item is cached.
    pub fn is_empty(&self) -> bool {
        self.kv.is_empty()
    }

    /// Output cached for exactly this clock. A block with the same number
    /// but another id is a miss.
    pub fn get(&self, clock: &Clock) -> Option<&Item> {
        self.kv.get(&clock.id)
    }

    /// Output cached for block number `block_num`, whatever its id.
    pub fn get_at_block(&self, block_num: u64) -> Option<&Item> {
        self.kv.values().find(|item| item.block_num == block_num)
    }

    /// Cache `payload` for `clock`.
    pub fn set(&mut self, clock: &Clock, payload: &[u8], skipped: bool) {
        let item = Item {
            block_num: clock.number,
            block_id: clock.id.clone(),
            payload: payload.to_vec(),
            timestamp: clock.timestamp.clone(),
            is_skipped: skipped,
        };
        self.kv.insert(clock.id.clone(), item);
    }

    /// Items ordered by block number.
    pub fn sorted_items(&self) -> Vec<&Item> {
        let mut items: Vec<&Item> = self.kv.values().collect();
        items.sort_by_key(|item| item.block_num);
        items
    }

    /// Load the file. Returns `false` when it does not exist.
    pub async fn load(&mut self) -> Result<bool> {
        let filename = self.filename();
        debug!(module = %self.module_name, file = %filename, range = %self.range, "loading output file");

        let data = match retry(RetryConfig::loads(), "read output file", || {
            self.object_store.read_object(&filename)
        })
        .await
        {
            Ok(data) => data,
            Err(StrataError::ObjectNotFound { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };

        let decoded = ExecOutputData::decode(data.as_slice()).map_err(|e| {
            StrataError::CorruptObject {
                name: filename.clone(),
                cause: e.to_string(),
            }
        })?;
        self.kv = decoded.kv;
        debug!(module = %self.module_name, outputs = self.kv.len(), "output file loaded");
        Ok(true)
    }

    /// Marshal the file for writing. Empty files are never written.
    pub fn save(&self) -> Option<OutputFileWriter> {
        if self.kv.is_empty() {
            info!(module = %self.module_name, range = %self.range, "not saving empty output file");
            return None;
        }
        let content = ExecOutputData {
            kv: self.kv.clone(),
        }
        .encode_to_vec();
        Some(OutputFileWriter {
            object_store: Arc::clone(&self.object_store),
            filename: self.filename(),
            content,
        })
    }

    /// The empty file of the next segment, `None` once the upper bound is
    /// reached.
    pub fn next_file(&self) -> Option<Self> {
        let start = self.range.exclusive_end;
        if start >= self.upper_bound {
            return None;
        }
        let end = next_boundary(start, self.interval).min(self.upper_bound);
        Some(Self::new(
            self.module_name.clone(),
            BlockRange::new(start, end),
            self.interval,
            self.upper_bound,
            Arc::clone(&self.object_store),
        ))
    }
}

impl fmt::Debug for ExecOutputFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecOutputFile")
            .field("module_name", &self.module_name)
            .field("range", &self.range)
            .field("items", &self.kv.len())
            .finish()
    }
}

/// A marshalled output file waiting to be written.
pub struct OutputFileWriter {
    object_store: Arc<dyn ObjectStore>,
    filename: String,
    content: Vec<u8>,
}

impl OutputFileWriter {
    /// Target object name.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Write the file, retrying transient failures up to 5 times.
    pub async fn write(self) -> Result<()> {
        info!(file = %self.filename, size = self.content.len(), "writing output file");
        retry(RetryConfig::loads(), "write output file", || {
            self.object_store
                .write_object(&self.filename, self.content.clone())
        })
        .await
    }
}

impl fmt::Debug for OutputFileWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputFileWriter")
            .field("filename", &self.filename)
            .field("size", &self.content.len())
            .finish()
    }
}
