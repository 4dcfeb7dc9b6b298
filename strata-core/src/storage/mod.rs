//! Keyed byte-blob storage.
//!
//! Every persisted artifact (store snapshots, output caches, index files) goes
//! through the [`ObjectStore`] trait. Names are `/`-separated and relative to
//! the store root; [`ObjectStore::sub_store`] scopes a store under a prefix.

mod local;
mod memory;
mod metered;
mod retry;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use metered::{ByteMeter, MeteredStore};
pub use retry::{retry, RetryConfig};

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Put/get/list over a keyed byte blob store.
#[async_trait]
pub trait ObjectStore: Send + Sync + fmt::Debug {
    /// Write (or overwrite) an object.
    async fn write_object(&self, name: &str, content: Vec<u8>) -> Result<()>;

    /// Read a whole object. Missing objects yield `ObjectNotFound`.
    async fn read_object(&self, name: &str) -> Result<Vec<u8>>;

    /// Whether an object exists.
    async fn file_exists(&self, name: &str) -> Result<bool>;

    /// Delete an object. Deleting a missing object is not an error.
    async fn delete_object(&self, name: &str) -> Result<()>;

    /// Names (relative to this store) of every object starting with `prefix`,
    /// in lexical order.
    async fn list_files(&self, prefix: &str) -> Result<Vec<String>>;

    /// A store rooted at `prefix` below this one.
    fn sub_store(&self, prefix: &str) -> Arc<dyn ObjectStore>;

    /// Human-readable location of the store root.
    fn base_url(&self) -> String;
}

pub(crate) fn join_prefix(base: &str, prefix: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if base.is_empty() {
        prefix.to_string()
    } else if prefix.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{prefix}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_prefix_handles_slashes() {
        assert_eq!(join_prefix("", "abc/states/"), "abc/states");
        assert_eq!(join_prefix("base", "/x"), "base/x");
        assert_eq!(join_prefix("base", ""), "base");
    }
}
