//! Removal of stale cache archives.

use crate::staleness::StalenessPolicy;
use crate::types::FlushReport;
use futures::StreamExt;
use kiln_core::{DeleteFailure, Error, FileEntry, ObjectStore, Result};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Default bound on concurrent deletes.
pub const DEFAULT_FLUSH_CONCURRENCY: usize = 8;

/// Lists a prefix and deletes the entries a policy marks stale.
pub struct Flusher {
    storage: Arc<dyn ObjectStore>,
    policy: Arc<dyn StalenessPolicy>,
    concurrency: usize,
}

impl Flusher {
    pub fn new(storage: Arc<dyn ObjectStore>, policy: Arc<dyn StalenessPolicy>) -> Self {
        Self {
            storage,
            policy,
            concurrency: DEFAULT_FLUSH_CONCURRENCY,
        }
    }

    /// Set the maximum number of deletes in flight.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Delete every stale object directly under `prefix`.
    ///
    /// A failed delete does not stop the others. If any failed, the result
    /// is [`Error::FlushIncomplete`] listing each failed key.
    pub async fn flush(&self, prefix: &str) -> Result<FlushReport> {
        let entries = self.storage.list(prefix).await?;
        let listed = entries.len();

        let stale: Vec<FileEntry> = entries
            .into_iter()
            .filter(|entry| self.policy.is_stale(entry))
            .collect();
        let matched = stale.len();
        debug!(prefix, listed, matched, "Evaluated cache entries");

        let storage = &self.storage;
        let outcomes: Vec<(String, Result<()>)> = futures::stream::iter(stale)
            .map(|entry| async move {
                let result = storage.delete(&entry.path).await;
                (entry.path, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut deleted = 0;
        let mut failures = Vec::new();
        for (key, result) in outcomes {
            match result {
                Ok(()) => {
                    info!(key = %key, "Deleted old cache");
                    deleted += 1;
                }
                Err(e) => {
                    error!(key = %key, error = %e, "Delete old cache failed");
                    failures.push(DeleteFailure {
                        key,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if !failures.is_empty() {
            failures.sort_by(|a, b| a.key.cmp(&b.key));
            return Err(Error::FlushIncomplete { deleted, failures });
        }

        Ok(FlushReport {
            listed,
            matched,
            deleted,
        })
    }
}
