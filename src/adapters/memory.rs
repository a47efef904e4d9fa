use crate::domain::ports::{ArtifactWriter, KeyStream, StagingStore};
use crate::utils::error::{Result, TransferError};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Process-local staging store. Cloning shares the same objects.
#[derive(Debug, Clone, Default)]
pub struct MemoryStagingStore {
    objects: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStagingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().await.get(key).cloned()
    }

    pub async fn insert(&self, key: &str, data: &[u8]) {
        self.objects
            .lock()
            .await
            .insert(key.to_string(), data.to_vec());
    }

    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.lock().await.is_empty()
    }
}

#[async_trait]
impl StagingStore for MemoryStagingStore {
    async fn open_write(&self, key: &str) -> Result<Box<dyn ArtifactWriter>> {
        Ok(Box::new(MemoryArtifactWriter {
            key: key.to_string(),
            buffer: Vec::new(),
            objects: Arc::clone(&self.objects),
            closed: false,
        }))
    }

    fn list<'a>(&'a self, prefix: &'a str) -> KeyStream<'a> {
        let snapshot = async move {
            let objects = self.objects.lock().await;
            objects
                .keys()
                .filter(|key| key.starts_with(prefix))
                .cloned()
                .map(Ok::<_, TransferError>)
                .collect::<Vec<_>>()
        };
        Box::pin(stream::once(snapshot).flat_map(stream::iter))
    }

    fn uri(&self, key: &str) -> String {
        format!("memory://{}", key)
    }
}

/// Publishes its bytes under the key when finished, replacing any old object.
struct MemoryArtifactWriter {
    key: String,
    buffer: Vec<u8>,
    objects: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    closed: bool,
}

#[async_trait]
impl ArtifactWriter for MemoryArtifactWriter {
    async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let data = std::mem::take(&mut self.buffer);
        self.objects.lock().await.insert(self.key.clone(), data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_write_overwrites_and_lists_by_prefix() {
        let store = MemoryStagingStore::new();
        store.insert("exports/Orders.csv", b"old").await;
        store.insert("other/Notes.csv", b"x").await;

        let mut writer = store.open_write("exports/Orders.csv").await.unwrap();
        writer.write(b"id\n").await.unwrap();
        writer.write(b"1\n").await.unwrap();
        writer.finish().await.unwrap();
        writer.finish().await.unwrap();

        assert_eq!(store.get("exports/Orders.csv").await.unwrap(), b"id\n1\n");

        let keys: Vec<String> = store.list("exports/").try_collect().await.unwrap();
        assert_eq!(keys, vec!["exports/Orders.csv"]);

        let all: Vec<String> = store.list("").try_collect().await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
