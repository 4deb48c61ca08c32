//! Cache types, operations and reports.

use crate::keys;
use crate::staleness::StalenessPolicy;
use kiln_core::{Error, Result};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Archive scheme, derived from an object's filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    /// Plain tar stream.
    Tar,
    /// Gzip-compressed tar stream.
    Gzip,
}

impl ArchiveKind {
    /// Resolve the archive kind from a filename suffix.
    pub fn from_filename(filename: &str) -> Result<Self> {
        if filename.ends_with(".tgz") || filename.ends_with(".tar.gz") {
            Ok(ArchiveKind::Gzip)
        } else if filename.ends_with(".tar") {
            Ok(ArchiveKind::Tar)
        } else {
            Err(Error::UnsupportedFormat(filename.to_string()))
        }
    }

    /// Resolve the archive kind from the last segment of an object key.
    pub fn from_key(key: &str) -> Result<Self> {
        Self::from_filename(keys::file_name(key))
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveKind::Tar => f.write_str("tar"),
            ArchiveKind::Gzip => f.write_str("gzip-tar"),
        }
    }
}

/// Archive format accepted on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ArchiveFormat {
    #[default]
    Tgz,
    Tar,
    TarGz,
}

impl ArchiveFormat {
    /// Object name used when no filename is configured.
    pub fn default_filename(self) -> &'static str {
        match self {
            ArchiveFormat::Tgz | ArchiveFormat::TarGz => "archive.tgz",
            ArchiveFormat::Tar => "archive.tar",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ArchiveFormat::Tgz => "tgz",
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::TarGz => "tar.gz",
        }
    }
}

impl FromStr for ArchiveFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tgz" => Ok(ArchiveFormat::Tgz),
            "tar" => Ok(ArchiveFormat::Tar),
            "tar.gz" => Ok(ArchiveFormat::TarGz),
            other => Err(Error::UnsupportedFormat(other.to_string())),
        }
    }
}

/// The single unit of work performed by one invocation.
#[derive(Clone)]
pub enum CacheOperation {
    /// Pack `mounts` and store the archive at `destination`.
    Rebuild {
        mounts: Vec<PathBuf>,
        destination: String,
    },
    /// Fetch `primary` (or `fallback` when it is missing) and unpack it.
    Restore { primary: String, fallback: String },
    /// Delete objects directly under `prefix` that `policy` considers stale.
    Flush {
        prefix: String,
        policy: Arc<dyn StalenessPolicy>,
    },
}

impl CacheOperation {
    pub fn mode(&self) -> &'static str {
        match self {
            CacheOperation::Rebuild { .. } => "rebuild",
            CacheOperation::Restore { .. } => "restore",
            CacheOperation::Flush { .. } => "flush",
        }
    }
}

impl fmt::Debug for CacheOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheOperation::Rebuild {
                mounts,
                destination,
            } => f
                .debug_struct("Rebuild")
                .field("mounts", mounts)
                .field("destination", destination)
                .finish(),
            CacheOperation::Restore { primary, fallback } => f
                .debug_struct("Restore")
                .field("primary", primary)
                .field("fallback", fallback)
                .finish(),
            CacheOperation::Flush { prefix, .. } => f
                .debug_struct("Flush")
                .field("prefix", prefix)
                .finish_non_exhaustive(),
        }
    }
}

/// Result of a rebuild.
#[derive(Debug, Clone)]
pub struct RebuildReport {
    /// Key the archive was stored at.
    pub key: String,
    pub kind: ArchiveKind,
    /// Archive size in bytes.
    pub bytes: u64,
    /// SHA-256 of the archive, hex encoded.
    pub checksum: String,
    pub duration_ms: u64,
}

/// Result of a restore.
#[derive(Debug, Clone)]
pub struct RestoreReport {
    /// The key that was restored, `None` on a cold cache.
    pub matched_key: Option<String>,
    /// Whether the fallback key was the one restored.
    pub used_fallback: bool,
    /// Archive size in bytes.
    pub bytes: u64,
    /// Number of archive entries unpacked.
    pub entries: usize,
    pub duration_ms: u64,
}

impl RestoreReport {
    pub fn is_hit(&self) -> bool {
        self.matched_key.is_some()
    }
}

/// Result of a flush in which every matching delete succeeded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub listed: usize,
    pub matched: usize,
    pub deleted: usize,
}

/// Outcome of executing a [`CacheOperation`].
#[derive(Debug, Clone)]
pub enum CacheOutcome {
    Rebuilt(RebuildReport),
    Restored(RestoreReport),
    Flushed(FlushReport),
}

impl CacheOutcome {
    /// Completion message printed by the binary.
    pub fn message(&self) -> &'static str {
        match self {
            CacheOutcome::Rebuilt(_) => "Cache rebuilt",
            CacheOutcome::Restored(_) => "Cache restored",
            CacheOutcome::Flushed(_) => "Cache flushed",
        }
    }
}
