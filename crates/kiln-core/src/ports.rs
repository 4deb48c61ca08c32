//! Port traits (hexagonal architecture).
//!
//! The cache engine talks to remote state only through [`ObjectStore`].

use crate::cache::FileEntry;
use crate::Result;
use async_trait::async_trait;

/// Remote object storage used to hold cache archives.
///
/// Implementations must report a missing key as
/// [`Error::ObjectNotFound`](crate::Error::ObjectNotFound) from `get` and
/// `delete`, whatever the backend's native signal is.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `content` at `key`, replacing any previous object.
    ///
    /// A reader must never observe a partially written object.
    async fn put(&self, key: &str, content: Vec<u8>) -> Result<()>;

    /// Fetch the complete content stored at `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// List objects directly under `prefix`.
    ///
    /// Keys that continue past a `/` after the prefix belong to a nested
    /// level and are not returned. No match yields an empty list.
    async fn list(&self, prefix: &str) -> Result<Vec<FileEntry>>;

    /// Remove the object at `key`.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}
