//! In-memory object store.

use crate::storage::is_direct_child;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kiln_core::{Error, FileEntry, ObjectStore, Result};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredObject {
    content: Vec<u8>,
    last_modified: DateTime<Utc>,
}

/// Object store held entirely in memory, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object with an explicit modification time.
    pub async fn insert_at(
        &self,
        key: impl Into<String>,
        content: impl Into<Vec<u8>>,
        last_modified: DateTime<Utc>,
    ) {
        self.objects.write().await.insert(
            key.into(),
            StoredObject {
                content: content.into(),
                last_modified,
            },
        );
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }

    /// All keys, at every level.
    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, key: &str, content: Vec<u8>) -> Result<()> {
        self.insert_at(key, content, Utc::now()).await;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|object| object.content.clone())
            .ok_or_else(|| Error::ObjectNotFound(key.to_string()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<FileEntry>> {
        let objects = self.objects.read().await;
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| is_direct_child(key, prefix))
            .map(|(key, object)| FileEntry {
                path: key.clone(),
                size: object.content.len() as u64,
                last_modified: object.last_modified,
            })
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects
            .write()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| Error::ObjectNotFound(key.to_string()))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
