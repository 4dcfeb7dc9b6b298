use super::filename::{parse_file_name, FileInfo};
use super::{FullKv, PartialKv, UpdatePolicy, ValueType};
use crate::block::BlockRange;
use crate::error::Result;
use crate::storage::{retry, ObjectStore, RetryConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Size limits applied to every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreLimits {
    /// Largest accepted value, in bytes.
    pub item_size_limit: u64,
    /// An append fails once the resulting value reaches this length.
    pub append_limit: u64,
    /// Upper bound on the sum of key and value sizes.
    pub total_size_limit: u64,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            item_size_limit: 10 * 1024 * 1024,
            append_limit: 8_388_608,
            total_size_limit: u64::MAX,
        }
    }
}

/// Static description of one store module and where its snapshots live.
pub struct StoreConfig {
    name: String,
    module_hash: String,
    initial_block: u64,
    update_policy: UpdatePolicy,
    value_type: ValueType,
    limits: StoreLimits,
    object_store: Arc<dyn ObjectStore>,
}

impl StoreConfig {
    /// Describe a store. Snapshots are rooted at `{module_hash}/states`
    /// below `base`.
    pub fn new(
        name: impl Into<String>,
        module_hash: impl Into<String>,
        initial_block: u64,
        update_policy: UpdatePolicy,
        value_type: ValueType,
        base: &Arc<dyn ObjectStore>,
    ) -> Self {
        let module_hash = module_hash.into();
        let object_store = base.sub_store(&format!("{module_hash}/states"));
        Self {
            name: name.into(),
            module_hash,
            initial_block,
            update_policy,
            value_type,
            limits: StoreLimits::default(),
            object_store,
        }
    }

    /// Override the size limits.
    pub fn with_limits(mut self, limits: StoreLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Module hash.
    pub fn module_hash(&self) -> &str {
        &self.module_hash
    }

    /// First block the module runs on.
    pub fn initial_block(&self) -> u64 {
        self.initial_block
    }

    /// Declared update policy.
    pub fn update_policy(&self) -> UpdatePolicy {
        self.update_policy
    }

    /// Declared value type.
    pub fn value_type(&self) -> &ValueType {
        &self.value_type
    }

    /// Size limits.
    pub fn limits(&self) -> StoreLimits {
        self.limits
    }

    /// Object store scoped to `{hash}/states`.
    pub fn object_store(&self) -> &Arc<dyn ObjectStore> {
        &self.object_store
    }

    /// A fresh, empty full store.
    pub fn new_full_kv(self: &Arc<Self>) -> FullKv {
        FullKv::new(Arc::clone(self))
    }

    /// A fresh, empty partial store starting at `initial_block`.
    pub fn new_partial_kv(self: &Arc<Self>, initial_block: u64) -> PartialKv {
        PartialKv::new(Arc::clone(self), initial_block)
    }

    /// Every parsable snapshot file, full and partial, in listing order.
    pub async fn list_snapshot_files(&self) -> Result<Vec<FileInfo>> {
        let names = retry(RetryConfig::listings(), "list store snapshots", || {
            self.object_store.list_files("")
        })
        .await?;

        let files: Vec<FileInfo> = names
            .iter()
            .filter_map(|name| {
                let parsed = parse_file_name(name);
                if parsed.is_none() {
                    debug!(store = %self.name, file = %name, "ignoring unrecognised state file");
                }
                parsed
            })
            .collect();
        Ok(files)
    }

    /// The full snapshot ending exactly at `exclusive_end`, if one was saved.
    pub async fn existing_full_kv(&self, exclusive_end: u64) -> Result<Option<FileInfo>> {
        let wanted = BlockRange::new(self.initial_block, exclusive_end);
        Ok(self
            .list_snapshot_files()
            .await?
            .into_iter()
            .find(|f| !f.partial && f.range == wanted))
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("name", &self.name)
            .field("module_hash", &self.module_hash)
            .field("initial_block", &self.initial_block)
            .field("update_policy", &self.update_policy)
            .field("value_type", &self.value_type)
            .field("limits", &self.limits)
            .field("object_store", &self.object_store.base_url())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn snapshot_listing_skips_foreign_files() {
        let base: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        let config = StoreConfig::new("s1", "abc", 0, UpdatePolicy::Set, ValueType::String, &base);
        base.write_object("abc/states/0000000010-0000000000.kv", vec![]).await.unwrap();
        base.write_object("abc/states/0000000020-0000000010.partial", vec![]).await.unwrap();
        base.write_object("abc/states/README", vec![]).await.unwrap();
        base.write_object("other/states/0000000010-0000000000.kv", vec![]).await.unwrap();

        let files = config.list_snapshot_files().await.unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().any(|f| f.partial && f.range == BlockRange::new(10, 20)));

        let full = config.existing_full_kv(10).await.unwrap().unwrap();
        assert_eq!(full.filename, "0000000010-0000000000.kv");
        assert!(config.existing_full_kv(20).await.unwrap().is_none());
    }

    #[test]
    fn default_limits() {
        let limits = StoreLimits::default();
        assert_eq!(limits.item_size_limit, 10 * 1024 * 1024);
        assert_eq!(limits.append_limit, 8 * 1024 * 1024);
        assert_eq!(limits.total_size_limit, u64::MAX);
    }
}
