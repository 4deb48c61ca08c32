//! Filesystem-backed object store for local development and shared volumes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kiln_core::{Error, FileEntry, ObjectStore, Result};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Staging files start with this so listings skip them.
const STAGING_PREFIX: &str = ".kiln-";

/// Object store that keeps each key as a file under a root directory.
///
/// `/` in a key maps to a directory level.
pub struct FilesystemStore {
    root_dir: PathBuf,
}

impl FilesystemStore {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    fn key_path(&self, operation: &'static str, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && !key.ends_with('/')
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(Error::storage(operation, key, "invalid object key"));
        }
        Ok(self.root_dir.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FilesystemStore {
    async fn put(&self, key: &str, content: Vec<u8>) -> Result<()> {
        let path = self.key_path("put", key)?;
        let parent = path
            .parent()
            .ok_or_else(|| Error::storage("put", key, "invalid object key"))?;

        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::storage("put", key, format!("Failed to create cache dir: {}", e)))?;

        // Write beside the target, then rename over it.
        let staging = parent.join(format!("{}{}.partial", STAGING_PREFIX, uuid::Uuid::new_v4()));
        if let Err(e) = tokio::fs::write(&staging, &content).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(Error::storage("put", key, format!("Failed to write cache: {}", e)));
        }
        if let Err(e) = tokio::fs::rename(&staging, &path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(Error::storage("put", key, format!("Failed to commit cache: {}", e)));
        }

        debug!(key, bytes = content.len(), "Stored object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.key_path("get", key)?;
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::ObjectNotFound(key.to_string())),
            Err(e) => Err(Error::storage("get", key, format!("Failed to read cache: {}", e))),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<FileEntry>> {
        let (dir_part, name_prefix) = match prefix.rfind('/') {
            Some(idx) => (&prefix[..=idx], &prefix[idx + 1..]),
            None => ("", prefix),
        };

        let search_dir = if dir_part.is_empty() {
            self.root_dir.clone()
        } else {
            self.key_path("list", dir_part.trim_end_matches('/'))?
        };

        let mut read_dir = match tokio::fs::read_dir(&search_dir).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => {
                return Err(Error::storage("list", prefix, format!("Failed to read cache dir: {}", e)));
            }
        };

        let mut entries = vec![];
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| Error::storage("list", prefix, format!("Failed to read entry: {}", e)))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(name_prefix) || name.starts_with(STAGING_PREFIX) {
                continue;
            }

            let metadata = entry.metadata().await.map_err(|e| {
                Error::storage("list", prefix, format!("Failed to read metadata: {}", e))
            })?;
            // Subdirectories are nested levels, not objects.
            if !metadata.is_file() {
                continue;
            }

            let last_modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            entries.push(FileEntry {
                path: format!("{}{}", dir_part, name),
                size: metadata.len(),
                last_modified,
            });
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.key_path("delete", key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::ObjectNotFound(key.to_string())),
            Err(e) => Err(Error::storage("delete", key, format!("Failed to delete cache: {}", e))),
        }
    }

    fn name(&self) -> &str {
        "filesystem"
    }
}
