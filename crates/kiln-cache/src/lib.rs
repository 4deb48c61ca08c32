//! Build cache lifecycle for Kiln.
//!
//! Packs mount directories into a single tar archive, moves it through an
//! [`ObjectStore`](kiln_core::ObjectStore), restores it with fallback, and
//! ages out old archives.

pub mod archiver;
pub mod compression;
pub mod engine;
pub mod flusher;
pub mod keys;
pub mod staleness;
pub mod storage;
pub mod types;

pub use engine::Cache;
pub use flusher::{DEFAULT_FLUSH_CONCURRENCY, Flusher};
pub use keys::{file_name, flush_prefix, object_key};
pub use staleness::{MaxAge, StalenessPolicy};
pub use storage::{FilesystemStore, MemoryStore, S3Config, S3Store};
pub use types::{
    ArchiveFormat, ArchiveKind, CacheOperation, CacheOutcome, FlushReport, RebuildReport,
    RestoreReport,
};
