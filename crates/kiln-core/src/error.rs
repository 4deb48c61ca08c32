//! Error types for Kiln.

use crate::cache::DeleteFailure;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Invocation errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown format: {0}, only tgz, tar.gz, tar are allowed")]
    UnsupportedFormat(String),

    // Local filesystem errors
    #[error("Failed to read cache source {}: {source}", .path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {}: {source}", .path.display())]
    DestinationUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),

    // Storage errors
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Storage {operation} failed for {key}: {message}")]
    Storage {
        operation: &'static str,
        key: String,
        message: String,
    },

    #[error(
        "Flush incomplete: {deleted} deleted, {} failed ({})",
        .failures.len(),
        join_failures(.failures)
    )]
    FlushIncomplete {
        deleted: usize,
        failures: Vec<DeleteFailure>,
    },

    // Generic
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Build a storage error for `operation` on `key`.
    pub fn storage(operation: &'static str, key: impl Into<String>, message: impl ToString) -> Self {
        Error::Storage {
            operation,
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error means the addressed object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ObjectNotFound(_))
    }
}

fn join_failures(failures: &[DeleteFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
