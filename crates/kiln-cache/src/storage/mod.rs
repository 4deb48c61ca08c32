//! Object store backends.

pub mod filesystem;
pub mod memory;
pub mod s3;

pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;
pub use s3::{S3Config, S3Store};

/// Whether `key` sits directly under `prefix` with no further `/` level.
pub(crate) fn is_direct_child(key: &str, prefix: &str) -> bool {
    key.strip_prefix(prefix)
        .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
}
