use super::ObjectStore;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Byte counters shared by a metered store and all its sub-stores.
#[derive(Debug, Default)]
pub struct ByteMeter {
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

impl ByteMeter {
    /// Bytes read so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// Bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }
}

/// Wraps another store and counts the bytes flowing through it.
#[derive(Debug, Clone)]
pub struct MeteredStore {
    inner: Arc<dyn ObjectStore>,
    meter: Arc<ByteMeter>,
}

impl MeteredStore {
    /// Wrap `inner` with a fresh meter.
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self {
            inner,
            meter: Arc::new(ByteMeter::default()),
        }
    }

    /// The shared meter.
    pub fn meter(&self) -> Arc<ByteMeter> {
        Arc::clone(&self.meter)
    }
}

#[async_trait]
impl ObjectStore for MeteredStore {
    async fn write_object(&self, name: &str, content: Vec<u8>) -> Result<()> {
        let len = content.len() as u64;
        self.inner.write_object(name, content).await?;
        self.meter.bytes_written.fetch_add(len, Ordering::Relaxed);
        Ok(())
    }

    async fn read_object(&self, name: &str) -> Result<Vec<u8>> {
        let content = self.inner.read_object(name).await?;
        self.meter
            .bytes_read
            .fetch_add(content.len() as u64, Ordering::Relaxed);
        Ok(content)
    }

    async fn file_exists(&self, name: &str) -> Result<bool> {
        self.inner.file_exists(name).await
    }

    async fn delete_object(&self, name: &str) -> Result<()> {
        self.inner.delete_object(name).await
    }

    async fn list_files(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list_files(prefix).await
    }

    fn sub_store(&self, prefix: &str) -> Arc<dyn ObjectStore> {
        Arc::new(Self {
            inner: self.inner.sub_store(prefix),
            meter: Arc::clone(&self.meter),
        })
    }

    fn base_url(&self) -> String {
        self.inner.base_url()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn counts_bytes_across_sub_stores() {
        let metered = MeteredStore::new(Arc::new(MemoryStore::new()));
        let sub = metered.sub_store("a/outputs");
        sub.write_object("x.output", vec![0; 12]).await.unwrap();
        metered.write_object("y", vec![0; 3]).await.unwrap();
        let _ = sub.read_object("x.output").await.unwrap();

        let meter = metered.meter();
        assert_eq!(meter.bytes_written(), 15);
        assert_eq!(meter.bytes_read(), 12);
    }
}
