use super::{join_prefix, ObjectStore};
use crate::error::{Result, StrataError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// In-memory object store. Sub-stores share the same backing map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Arc<DashMap<String, Vec<u8>>>,
    prefix: String,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn full_name(&self, name: &str) -> String {
        join_prefix(&self.prefix, name)
    }

    /// Total number of objects in the backing map, across all prefixes.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True when the backing map holds no object.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Every object name in the backing map, sorted.
    pub fn all_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.objects.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn write_object(&self, name: &str, content: Vec<u8>) -> Result<()> {
        self.objects.insert(self.full_name(name), content);
        Ok(())
    }

    async fn read_object(&self, name: &str) -> Result<Vec<u8>> {
        self.objects
            .get(&self.full_name(name))
            .map(|v| v.value().clone())
            .ok_or_else(|| StrataError::ObjectNotFound {
                name: name.to_string(),
            })
    }

    async fn file_exists(&self, name: &str) -> Result<bool> {
        Ok(self.objects.contains_key(&self.full_name(name)))
    }

    async fn delete_object(&self, name: &str) -> Result<()> {
        self.objects.remove(&self.full_name(name));
        Ok(())
    }

    async fn list_files(&self, prefix: &str) -> Result<Vec<String>> {
        let root = if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        };
        let mut names: Vec<String> = self
            .objects
            .iter()
            .filter_map(|e| e.key().strip_prefix(&root).map(str::to_string))
            .filter(|n| n.starts_with(prefix))
            .collect();
        names.sort();
        Ok(names)
    }

    fn sub_store(&self, prefix: &str) -> Arc<dyn ObjectStore> {
        Arc::new(Self {
            objects: Arc::clone(&self.objects),
            prefix: join_prefix(&self.prefix, prefix),
        })
    }

    fn base_url(&self) -> String {
        format!("memory://{}", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_read_delete() {
        let store = MemoryStore::new();
        store.write_object("a/b.kv", b"hello".to_vec()).await.unwrap();
        assert_eq!(store.read_object("a/b.kv").await.unwrap(), b"hello");
        assert!(store.file_exists("a/b.kv").await.unwrap());

        store.delete_object("a/b.kv").await.unwrap();
        let err = store.read_object("a/b.kv").await.unwrap_err();
        assert!(matches!(err, StrataError::ObjectNotFound { .. }));
    }

    #[tokio::test]
    async fn sub_stores_share_objects() {
        let root = MemoryStore::new();
        let states = root.sub_store("abc/states");
        states
            .write_object("0000000010-0000000000.kv", vec![1])
            .await
            .unwrap();
        states
            .write_object("0000000020-0000000000.kv", vec![2])
            .await
            .unwrap();

        assert_eq!(
            root.all_names(),
            vec![
                "abc/states/0000000010-0000000000.kv".to_string(),
                "abc/states/0000000020-0000000000.kv".to_string(),
            ]
        );
        let listed = states.list_files("").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0], "0000000010-0000000000.kv");
        assert!(root.sub_store("other").list_files("").await.unwrap().is_empty());
    }
}
