//! Kiln Core
//!
//! Shared vocabulary for the Kiln build cache: the error type, the
//! object listing snapshot, and the storage port every backend implements.

pub mod cache;
pub mod error;
pub mod ports;

pub use cache::{DeleteFailure, FileEntry};
pub use error::{Error, Result};
pub use ports::ObjectStore;
