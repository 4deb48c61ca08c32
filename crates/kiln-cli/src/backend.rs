//! Storage backend construction.

use crate::settings::BackendConfig;
use kiln_cache::{FilesystemStore, S3Store};
use kiln_core::{ObjectStore, Result};
use std::sync::Arc;
use tracing::info;

/// Build the object store an invocation runs against.
pub fn connect(config: &BackendConfig) -> Result<Arc<dyn ObjectStore>> {
    match config {
        BackendConfig::S3(s3) => Ok(Arc::new(S3Store::new(s3)?)),
        BackendConfig::Filesystem { root } => {
            info!(root = %root.display(), "Using filesystem storage");
            Ok(Arc::new(FilesystemStore::new(root.clone())))
        }
    }
}
