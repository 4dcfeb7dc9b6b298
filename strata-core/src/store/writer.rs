use crate::error::Result;
use crate::storage::{retry, ObjectStore, RetryConfig};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A marshalled snapshot waiting to be written.
///
/// Produced by `save`; the caller decides when the write happens so that
/// snapshots can be flushed after the block that produced them is final.
pub struct StoreWriter {
    object_store: Arc<dyn ObjectStore>,
    filename: String,
    content: Vec<u8>,
}

impl StoreWriter {
    pub(crate) fn new(object_store: Arc<dyn ObjectStore>, filename: String, content: Vec<u8>) -> Self {
        Self {
            object_store,
            filename,
            content,
        }
    }

    /// Target object name.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Size of the marshalled snapshot.
    pub fn len(&self) -> usize {
        self.content.len()
    }

    /// True when the snapshot encodes to zero bytes.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Write the snapshot, retrying transient failures up to 10 times.
    pub async fn write(self) -> Result<()> {
        let Self {
            object_store,
            filename,
            content,
        } = self;
        let size = content.len();
        retry(RetryConfig::saves(), "write store snapshot", || {
            object_store.write_object(&filename, content.clone())
        })
        .await?;
        debug!(file = %filename, size, "store snapshot written");
        Ok(())
    }
}

impl fmt::Debug for StoreWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreWriter")
            .field("filename", &self.filename)
            .field("size", &self.content.len())
            .finish()
    }
}

/// Read a snapshot blob, retrying transient failures up to 5 times.
pub(crate) async fn load_blob(object_store: &Arc<dyn ObjectStore>, filename: &str) -> Result<Vec<u8>> {
    retry(RetryConfig::loads(), "read store snapshot", || {
        object_store.read_object(filename)
    })
    .await
}
