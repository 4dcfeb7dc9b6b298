use crate::block::BlockRange;
use crate::error::{Result, StrataError};
use crate::pb::IndexData;
use crate::storage::{retry, ObjectStore, RetryConfig};
use prost::Message;
use roaring::RoaringTreemap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// `{start:010}-{end:010}.index`
pub fn index_file_name(range: &BlockRange) -> String {
    format!("{:010}-{:010}.index", range.start, range.exclusive_end)
}

/// Per-key block bitmaps emitted by one index module over one range.
pub struct IndexFile {
    module_name: String,
    range: BlockRange,
    indices: HashMap<String, RoaringTreemap>,
    object_store: Arc<dyn ObjectStore>,
}

impl IndexFile {
    /// A file rooted at `{module_hash}/index` below `base`.
    pub fn new(
        module_name: impl Into<String>,
        module_hash: &str,
        range: BlockRange,
        base: &Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            module_name: module_name.into(),
            range,
            indices: HashMap::new(),
            object_store: base.sub_store(&format!("{module_hash}/index")),
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

    /// Object name relative to `{hash}/index`.
    pub fn filename(&self) -> String {
        index_file_name(&self.range)
    }

    /// Bitmaps by key.
    pub fn indices(&self) -> &HashMap<String, RoaringTreemap> {
        &self.indices
    }

    /// Take the bitmaps out of the file.
    pub fn into_indices(self) -> HashMap<String, RoaringTreemap> {
        self.indices
    }

    /// Record that `block_num` emitted `keys`.
    pub fn set<S: AsRef<str>>(&mut self, keys: &[S], block_num: u64) {
        for key in keys {
            self.indices
                .entry(key.as_ref().to_string())
                .or_insert_with(RoaringTreemap::new)
                .insert(block_num);
        }
    }

    /// Load the file. Returns `false` when it does not exist.
    pub async fn load(&mut self) -> Result<bool> {
        let filename = self.filename();
        let data = match retry(RetryConfig::loads(), "read index file", || {
            self.object_store.read_object(&filename)
        })
        .await
        {
            Ok(data) => data,
            Err(StrataError::ObjectNotFound { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };

        let corrupt = |cause: String| StrataError::CorruptObject {
            name: filename.clone(),
            cause,
        };
        let decoded = IndexData::decode(data.as_slice()).map_err(|e| corrupt(e.to_string()))?;
        let mut indices = HashMap::with_capacity(decoded.indexes.len());
        for (key, raw) in decoded.indexes {
            let bitmap = RoaringTreemap::deserialize_from(raw.as_slice())
                .map_err(|e| corrupt(format!("bitmap for key '{key}': {e}")))?;
            indices.insert(key, bitmap);
        }
        self.indices = indices;
        debug!(module = %self.module_name, keys = self.indices.len(), "index file loaded");
        Ok(true)
    }

    /// Write the file, retrying transient failures up to 5 times.
    pub async fn save(&self) -> Result<()> {
        let mut indexes = HashMap::with_capacity(self.indices.len());
        for (key, bitmap) in &self.indices {
            let mut raw = Vec::with_capacity(bitmap.serialized_size());
            bitmap
                .serialize_into(&mut raw)
                .map_err(|e| StrataError::Serialization(format!("index bitmap '{key}': {e}")))?;
            indexes.insert(key.clone(), raw);
        }
        let content = IndexData { indexes }.encode_to_vec();
        let filename = self.filename();
        info!(module = %self.module_name, file = %filename, keys = self.indices.len(), "writing index file");
        retry(RetryConfig::loads(), "write index file", || {
            self.object_store.write_object(&filename, content.clone())
        })
        .await
    }
}

impl fmt::Debug for IndexFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexFile")
            .field("module_name", &self.module_name)
            .field("range", &self.range)
            .field("keys", &self.indices.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn save_and_load_bitmaps() {
        let base: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        let range = BlockRange::new(0, 1000);
        let mut file = IndexFile::new("idx", "h", range, &base);
        file.set(&["a", "b"], 10);
        file.set(&["a"], 999);
        file.save().await.unwrap();
        assert!(base.file_exists("h/index/0000000000-0000001000.index").await.unwrap());

        let mut loaded = IndexFile::new("idx", "h", range, &base);
        assert!(loaded.load().await.unwrap());
        let a: Vec<u64> = loaded.indices()["a"].iter().collect();
        assert_eq!(a, vec![10, 999]);
        assert_eq!(loaded.indices()["b"].len(), 1);

        let mut missing = IndexFile::new("idx", "h", BlockRange::new(1000, 2000), &base);
        assert!(!missing.load().await.unwrap());
    }
}
