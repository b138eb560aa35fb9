//! # Design
//!
//! - Structured, constant-message errors for cache writes and administration.
//! - Corrupted or unreadable entries on the read path are never errors; they
//!   surface as a miss instead.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors produced by snapshot cache writes and administration.
#[derive(Debug, Error)]
pub enum CacheError {
    /// IO failures while interacting with the cache directory.
    #[error("cache io failure")]
    Io {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Path involved in the IO failure.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Serializing a snapshot or envelope failed.
    #[error("cache encode failure")]
    Encode {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
    /// Compressing the payload failed.
    #[error("cache compression failure")]
    Compression {
        /// Underlying IO error from the encoder.
        #[source]
        source: io::Error,
    },
    /// Directory traversal failed while listing entries.
    #[error("cache walkdir failure")]
    Walkdir {
        /// Directory being listed.
        path: PathBuf,
        /// Underlying walkdir error.
        #[source]
        source: walkdir::Error,
    },
    /// A key string did not have the expected shape.
    #[error("invalid cache key")]
    InvalidKey {
        /// Offending value.
        value: String,
    },
}
