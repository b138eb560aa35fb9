//! # Design
//!
//! - Only pre-destructive failures are errors; per-candidate failures become
//!   outcomes and never abort a run.
//! - Keep error messages constant while carrying context fields for debugging.

use std::io;
use std::path::PathBuf;

use offboard_core::SourceError;
use thiserror::Error;

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine-level error type.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The target principal was not a valid email address.
    #[error("invalid principal")]
    InvalidPrincipal {
        /// Raw value supplied by the caller.
        value: String,
    },
    /// The inventory could not be retrieved and no usable snapshot exists.
    #[error("file source unavailable")]
    SourceUnavailable {
        /// Scan step that failed.
        operation: &'static str,
        /// Whether an expired snapshot exists that `allow_stale` would accept.
        stale_available: bool,
        /// Underlying source error.
        #[source]
        source: SourceError,
    },
    /// Writing an audit record failed.
    #[error("audit record write failed")]
    Audit {
        /// Audit log path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Serializing an audit record failed.
    #[error("audit record encode failed")]
    AuditEncode {
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}
