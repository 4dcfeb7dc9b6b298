use super::filename::FileInfo;
use super::kv::{BaseStore, DeletedPrefixes};
use super::marshal::{marshal, unmarshal};
use super::writer::{load_blob, StoreWriter};
use super::StoreConfig;
use crate::error::{Result, StrataError};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::{debug, warn};

/// Store state accumulated over one segment only, plus the prefixes deleted
/// during that segment.
#[derive(Debug, Clone)]
pub struct PartialKv {
    base: BaseStore,
    initial_block: u64,
    loaded_from: Option<String>,
}

impl PartialKv {
    pub(crate) fn new(config: Arc<StoreConfig>, initial_block: u64) -> Self {
        Self {
            base: BaseStore::new(config, true),
            initial_block,
            loaded_from: None,
        }
    }

    /// First block covered by this partial.
    pub fn initial_block(&self) -> u64 {
        self.initial_block
    }

    /// Prefixes deleted since [`initial_block`](Self::initial_block), in
    /// first-seen order.
    pub fn deleted_prefixes(&self) -> &[String] {
        self.base
            .deleted_prefixes
            .as_ref()
            .map(|d| d.list.as_slice())
            .unwrap_or_default()
    }

    /// Name of the file this store was loaded from, if any.
    pub fn loaded_from(&self) -> Option<&str> {
        self.loaded_from.as_deref()
    }

    /// Load a partial snapshot.
    pub async fn load(&mut self, file: &FileInfo) -> Result<()> {
        debug!(store = %self.name(), file = %file, "loading partial store");
        let data = load_blob(self.config().object_store(), &file.filename).await?;
        let snapshot = unmarshal(&data).map_err(|e| StrataError::StoreDecode {
            module: self.name().to_string(),
            cause: format!("{}: {e}", file.filename),
        })?;

        self.base.replace_kv(snapshot.kv, snapshot.size);
        self.base.deleted_prefixes = Some(DeletedPrefixes::from_list(snapshot.delete_prefixes));
        self.initial_block = file.range.start;
        self.loaded_from = Some(file.filename.clone());
        debug!(store = %self.name(), keys = self.len(), size = snapshot.size, "partial store loaded");
        Ok(())
    }

    /// Marshal the kv and deleted prefixes as the partial snapshot over
    /// `[initial_block, exclusive_end)`.
    pub fn save(&self, exclusive_end: u64) -> (FileInfo, StoreWriter) {
        let file = FileInfo::partial(self.initial_block, exclusive_end);
        let content = marshal(&self.base.kv, self.deleted_prefixes());
        debug!(
            store = %self.name(),
            file = %file,
            keys = self.len(),
            deleted_prefixes = self.deleted_prefixes().len(),
            "saving partial store"
        );
        let writer = StoreWriter::new(
            Arc::clone(self.config().object_store()),
            file.filename.clone(),
            content,
        );
        (file, writer)
    }

    /// Start a new segment at `last_block`, dropping the accumulated kv and
    /// deleted prefixes.
    pub fn roll(&mut self, last_block: u64) {
        self.initial_block = last_block;
        self.base.replace_kv(HashMap::new(), 0);
        self.base.deleted_prefixes = Some(DeletedPrefixes::default());
    }

    /// Delete a snapshot file of this store.
    pub async fn delete_store(&self, file: &FileInfo) -> Result<()> {
        debug!(store = %self.name(), file = %file, "deleting partial store file");
        self.config()
            .object_store()
            .delete_object(&file.filename)
            .await
            .inspect_err(|e| warn!(file = %file, error = %e, "failed to delete partial store file"))
    }
}

impl Deref for PartialKv {
    type Target = BaseStore;

    fn deref(&self) -> &BaseStore {
        &self.base
    }
}

impl DerefMut for PartialKv {
    fn deref_mut(&mut self) -> &mut BaseStore {
        &mut self.base
    }
}
