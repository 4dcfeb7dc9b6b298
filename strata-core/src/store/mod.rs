//! Store engine.
//!
//! A store is the key/value accumulator owned by one store module. Writes
//! are gated by the declared [`UpdatePolicy`] and [`ValueType`], recorded as
//! block-local deltas, and snapshotted to object storage at segment
//! boundaries either as a cumulative [`FullKv`] or a segment-scoped
//! [`PartialKv`].

mod config;
mod filename;
mod full;
mod kv;
pub mod marshal;
mod merge;
mod numeric;
mod partial;
mod policy;
mod writer;

pub use config::{StoreConfig, StoreLimits};
pub use filename::{full_file_name, parse_file_name, partial_file_name, FileInfo};
pub use full::FullKv;
pub use kv::BaseStore;
pub use numeric::{format_plain, truncate_digits, Numeric, BIG_DECIMAL_DIGITS};
pub use partial::PartialKv;
pub use policy::{NumericType, UpdatePolicy, ValueType};
pub use writer::StoreWriter;

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// A store as used by a running pipeline.
#[derive(Debug, Clone)]
pub enum KvStore {
    /// Cumulative state, used by Tier-1 and by stores of earlier stages.
    Full(FullKv),
    /// Segment-scoped state, written by Tier-2 for the stores it produces.
    Partial(PartialKv),
}

impl KvStore {
    /// Marshal the store for the boundary `exclusive_end`.
    pub fn save(&self, exclusive_end: u64) -> (FileInfo, StoreWriter) {
        match self {
            Self::Full(s) => s.save(exclusive_end),
            Self::Partial(s) => s.save(exclusive_end),
        }
    }

    /// Whether this is a partial store.
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::Partial(_))
    }

    /// The full store, if this is one.
    pub fn as_full(&self) -> Option<&FullKv> {
        match self {
            Self::Full(s) => Some(s),
            Self::Partial(_) => None,
        }
    }

    /// The partial store, if this is one.
    pub fn as_partial_mut(&mut self) -> Option<&mut PartialKv> {
        match self {
            Self::Full(_) => None,
            Self::Partial(s) => Some(s),
        }
    }
}

impl Deref for KvStore {
    type Target = BaseStore;

    fn deref(&self) -> &BaseStore {
        match self {
            Self::Full(s) => s,
            Self::Partial(s) => s,
        }
    }
}

impl DerefMut for KvStore {
    fn deref_mut(&mut self) -> &mut BaseStore {
        match self {
            Self::Full(s) => s,
            Self::Partial(s) => s,
        }
    }
}

impl From<FullKv> for KvStore {
    fn from(s: FullKv) -> Self {
        Self::Full(s)
    }
}

impl From<PartialKv> for KvStore {
    fn from(s: PartialKv) -> Self {
        Self::Partial(s)
    }
}

/// Shared handle on a store. Host functions and the pipeline both hold one.
pub type StoreHandle = Arc<Mutex<KvStore>>;

/// Stores of a pipeline, keyed by module name.
#[derive(Debug, Clone, Default)]
pub struct StoreMap {
    stores: BTreeMap<String, StoreHandle>,
}

impl StoreMap {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a store under its module name.
    pub fn insert(&mut self, store: impl Into<KvStore>) -> StoreHandle {
        let store = store.into();
        let name = store.name().to_string();
        let handle = Arc::new(Mutex::new(store));
        self.stores.insert(name, Arc::clone(&handle));
        handle
    }

    /// Store of module `name`.
    pub fn get(&self, name: &str) -> Option<&StoreHandle> {
        self.stores.get(name)
    }

    /// Whether a store named `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.stores.contains_key(name)
    }

    /// Number of stores.
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    /// True when no store is registered.
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Stores in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &StoreHandle)> {
        self.stores.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Clear the deltas of every store.
    pub fn reset_all(&self) {
        for store in self.stores.values() {
            store.lock().reset();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::config_with;
    use super::*;

    #[test]
    fn store_map_shares_handles() {
        let config = config_with(UpdatePolicy::Set, ValueType::String, StoreLimits::default());
        let mut map = StoreMap::new();
        let handle = map.insert(config.new_full_kv());
        handle.lock().set(1, "k", b"v").unwrap();

        let same = map.get("store").unwrap();
        assert_eq!(same.lock().get_last("k"), Some(&b"v"[..]));
        map.reset_all();
        assert!(same.lock().deltas().is_empty());
        assert!(!same.lock().is_partial());
    }

    #[test]
    fn kv_store_dispatches_save() {
        let config = config_with(UpdatePolicy::Set, ValueType::String, StoreLimits::default());
        let partial: KvStore = config.new_partial_kv(10).into();
        let (file, _) = partial.save(20);
        assert!(file.partial);
        assert_eq!(file.range.start, 10);
    }
}
