//! Cache engine: rebuild and restore over an object store.

use crate::archiver::{create_archive, extract_archive};
use crate::flusher::{DEFAULT_FLUSH_CONCURRENCY, Flusher};
use crate::types::{ArchiveKind, CacheOperation, CacheOutcome, RebuildReport, RestoreReport};
use kiln_core::{Error, ObjectStore, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Moves mount directories to and from an object store as one archive.
pub struct Cache {
    storage: Arc<dyn ObjectStore>,
    root: PathBuf,
    flush_concurrency: usize,
}

impl Cache {
    /// Engine archiving relative to the filesystem root.
    pub fn new(storage: Arc<dyn ObjectStore>) -> Self {
        Self {
            storage,
            root: PathBuf::from("/"),
            flush_concurrency: DEFAULT_FLUSH_CONCURRENCY,
        }
    }

    /// Set the directory archive entries are relative to.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_flush_concurrency(mut self, concurrency: usize) -> Self {
        self.flush_concurrency = concurrency;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run a single operation to completion.
    pub async fn execute(&self, operation: CacheOperation) -> Result<CacheOutcome> {
        match operation {
            CacheOperation::Rebuild {
                mounts,
                destination,
            } => {
                info!("Rebuilding cache at {}", destination);
                self.rebuild(&mounts, &destination)
                    .await
                    .map(CacheOutcome::Rebuilt)
            }
            CacheOperation::Restore { primary, fallback } => {
                info!("Restoring cache at {}", primary);
                self.restore(&primary, &fallback)
                    .await
                    .map(CacheOutcome::Restored)
            }
            CacheOperation::Flush { prefix, policy } => {
                info!("Flushing cache items at {}", prefix);
                Flusher::new(self.storage.clone(), policy)
                    .with_concurrency(self.flush_concurrency)
                    .flush(&prefix)
                    .await
                    .map(CacheOutcome::Flushed)
            }
        }
    }

    /// Pack `mounts` and store the archive at `destination`.
    ///
    /// The archive is fully built before the upload starts, so a failure
    /// while packing leaves `destination` untouched.
    pub async fn rebuild(&self, mounts: &[PathBuf], destination: &str) -> Result<RebuildReport> {
        let start = Instant::now();
        if mounts.is_empty() {
            return Err(Error::Configuration("No mounts specified".into()));
        }
        let kind = ArchiveKind::from_key(destination)?;

        let archive = {
            let mounts = mounts.to_vec();
            let root = self.root.clone();
            tokio::task::spawn_blocking(move || create_archive(&mounts, &root, kind))
                .await
                .map_err(|e| Error::Internal(format!("Archive task failed: {}", e)))??
        };

        let bytes = archive.len() as u64;
        let checksum = hex::encode(Sha256::digest(&archive));
        debug!(key = destination, bytes, %kind, %checksum, "Packed cache archive");

        self.storage.put(destination, archive).await?;

        Ok(RebuildReport {
            key: destination.to_string(),
            kind,
            bytes,
            checksum,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Fetch `primary`, or `fallback` when `primary` does not exist, and
    /// unpack it under the root.
    ///
    /// Nothing found at either key is a successful no-op.
    pub async fn restore(&self, primary: &str, fallback: &str) -> Result<RestoreReport> {
        let start = Instant::now();

        let (key, archive, used_fallback) = match self.fetch(primary).await? {
            Some(archive) => (primary, archive, false),
            None if fallback != primary => {
                warn!("Failed to retrieve {}, trying {}", primary, fallback);
                match self.fetch(fallback).await? {
                    Some(archive) => (fallback, archive, true),
                    None => return Ok(self.cold_start(primary, fallback, start)),
                }
            }
            None => return Ok(self.cold_start(primary, fallback, start)),
        };

        let kind = ArchiveKind::from_key(key)?;
        let bytes = archive.len() as u64;

        let entries = {
            let root = self.root.clone();
            tokio::task::spawn_blocking(move || extract_archive(&archive, kind, &root))
                .await
                .map_err(|e| Error::Internal(format!("Extract task failed: {}", e)))?
                .map_err(|e| match e {
                    Error::CorruptArchive(message) => {
                        Error::CorruptArchive(format!("{}: {}", key, message))
                    }
                    other => other,
                })?
        };
        info!(key, bytes, entries, "Restored cache archive");

        Ok(RestoreReport {
            matched_key: Some(key.to_string()),
            used_fallback,
            bytes,
            entries,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.storage.get(key).await {
            Ok(archive) => Ok(Some(archive)),
            Err(e) if e.is_not_found() => {
                debug!(key, backend = self.storage.name(), "No cache archive at key");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn cold_start(&self, primary: &str, fallback: &str, start: Instant) -> RestoreReport {
        info!(
            "No cache found at {} or {}, nothing to restore",
            primary, fallback
        );
        RestoreReport {
            matched_key: None,
            used_fallback: false,
            bytes: 0,
            entries: 0,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}
