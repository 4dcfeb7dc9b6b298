use super::ObjectStore;
use crate::error::{Result, ResultExt, StrataError};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Object store backed by a local directory.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Create a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name.trim_start_matches('/'))
    }

    async fn walk(dir: &Path, base: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
        let mut stack = vec![dir.to_path_buf()];
        while let Some(current) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    stack.push(path);
                } else if let Ok(rel) = path.strip_prefix(base) {
                    out.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn write_object(&self, name: &str, content: Vec<u8>) -> Result<()> {
        let path = self.path(name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .storage_context("create_dir", name)?;
        }
        // Write to a sibling temp file then rename, so readers never observe
        // a partially written object.
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp-write");
        tokio::fs::write(&tmp, content)
            .await
            .storage_context("write", name)?;
        tokio::fs::rename(&tmp, &path)
            .await
            .storage_context("rename", name)
    }

    async fn read_object(&self, name: &str) -> Result<Vec<u8>> {
        match tokio::fs::read(self.path(name)).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StrataError::ObjectNotFound {
                name: name.to_string(),
            }),
            Err(e) => Err(e).storage_context("read", name),
        }
    }

    async fn file_exists(&self, name: &str) -> Result<bool> {
        tokio::fs::try_exists(self.path(name))
            .await
            .storage_context("stat", name)
    }

    async fn delete_object(&self, name: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).storage_context("delete", name),
        }
    }

    async fn list_files(&self, prefix: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        Self::walk(&self.root, &self.root, &mut names)
            .await
            .storage_context("list", prefix)?;
        names.retain(|n| n.starts_with(prefix) && !n.ends_with(".tmp-write"));
        names.sort();
        Ok(names)
    }

    fn sub_store(&self, prefix: &str) -> Arc<dyn ObjectStore> {
        Arc::new(Self::new(self.path(prefix.trim_end_matches('/'))))
    }

    fn base_url(&self) -> String {
        format!("file://{}", self.root.display())
    }
}
