use super::filename::FileInfo;
use super::kv::BaseStore;
use super::marshal::{marshal, unmarshal};
use super::writer::{load_blob, StoreWriter};
use super::{PartialKv, StoreConfig};
use crate::error::{Result, StrataError};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::{debug, info};

/// Cumulative store state from the module initial block up to a boundary.
#[derive(Debug, Clone)]
pub struct FullKv {
    base: BaseStore,
    loaded_from: Option<String>,
}

impl FullKv {
    pub(crate) fn new(config: Arc<StoreConfig>) -> Self {
        Self {
            base: BaseStore::new(config, false),
            loaded_from: None,
        }
    }

    /// Name of the file this store was loaded from, if any.
    pub fn loaded_from(&self) -> Option<&str> {
        self.loaded_from.as_deref()
    }

    /// Load the full snapshot ending at `exclusive_end`.
    pub async fn load(&mut self, exclusive_end: u64) -> Result<()> {
        let file = FileInfo::full(self.config().initial_block(), exclusive_end);
        debug!(store = %self.name(), file = %file, "loading full store");

        let data = load_blob(self.config().object_store(), &file.filename).await?;
        let snapshot = unmarshal(&data).map_err(|e| StrataError::StoreDecode {
            module: self.name().to_string(),
            cause: format!("{}: {e}", file.filename),
        })?;

        let keys = snapshot.kv.len();
        self.base.replace_kv(snapshot.kv, snapshot.size);
        self.loaded_from = Some(file.filename);
        debug!(store = %self.name(), keys, size = snapshot.size, "full store loaded");
        Ok(())
    }

    /// Marshal the current kv as the full snapshot ending at
    /// `exclusive_end`. Nothing is written until the returned writer runs.
    pub fn save(&self, exclusive_end: u64) -> (FileInfo, StoreWriter) {
        let file = FileInfo::full(self.config().initial_block(), exclusive_end);
        let content = marshal(&self.base.kv, &[]);
        info!(store = %self.name(), file = %file, keys = self.len(), "saving full store");
        let writer = StoreWriter::new(
            Arc::clone(self.config().object_store()),
            file.filename.clone(),
            content,
        );
        (file, writer)
    }

    /// An empty partial store sharing this store's configuration.
    pub fn derive_partial(&self, initial_block: u64) -> PartialKv {
        PartialKv::new(Arc::clone(self.config()), initial_block)
    }

    /// Borrow the underlying store.
    pub fn base(&self) -> &BaseStore {
        &self.base
    }
}

impl Deref for FullKv {
    type Target = BaseStore;

    fn deref(&self) -> &BaseStore {
        &self.base
    }
}

impl DerefMut for FullKv {
    fn deref_mut(&mut self) -> &mut BaseStore {
        &mut self.base
    }
}

#[cfg(test)]
mod tests {
    use crate::store::testing::config_with;
    use crate::store::{StoreLimits, UpdatePolicy, ValueType};

    #[tokio::test]
    async fn save_then_load() {
        let config = config_with(UpdatePolicy::Set, ValueType::String, StoreLimits::default());
        let mut store = config.new_full_kv();
        store.set(1, "a", b"1").unwrap();
        store.set(2, "b", b"22").unwrap();

        let (file, writer) = store.save(10);
        assert_eq!(file.filename, "0000000010-0000000000.kv");
        writer.write().await.unwrap();

        let mut loaded = config.new_full_kv();
        loaded.load(10).await.unwrap();
        assert_eq!(loaded.kv(), store.kv());
        assert_eq!(loaded.total_size_bytes(), store.total_size_bytes());
        assert_eq!(loaded.loaded_from(), Some("0000000010-0000000000.kv"));
        assert!(loaded.deltas().is_empty());
    }

    #[tokio::test]
    async fn missing_snapshot_is_not_found() {
        let config = config_with(UpdatePolicy::Set, ValueType::String, StoreLimits::default());
        let err = config.new_full_kv().load(20).await.unwrap_err();
        assert_eq!(err.code(), "E501");
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_a_decode_error() {
        let config = config_with(UpdatePolicy::Set, ValueType::String, StoreLimits::default());
        config
            .object_store()
            .write_object("0000000010-0000000000.kv", vec![0x0A, 0x20, 0x01])
            .await
            .unwrap();
        let err = config.new_full_kv().load(10).await.unwrap_err();
        assert_eq!(err.code(), "E402");
    }

    #[test]
    fn derived_partial_shares_config() {
        let config = config_with(UpdatePolicy::Add, ValueType::Int64, StoreLimits::default());
        let full = config.new_full_kv();
        let partial = full.derive_partial(30);
        assert_eq!(partial.initial_block(), 30);
        assert_eq!(partial.name(), full.name());
        assert!(partial.is_empty());
    }
}
