//! Error types for model parsing and validation.

use thiserror::Error;

/// Errors raised while parsing or validating inventory values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// The target principal was not a well-formed email address.
    #[error("invalid principal")]
    InvalidPrincipal {
        /// Raw value supplied by the caller.
        value: String,
    },
    /// A permission role string was not recognised.
    #[error("invalid permission role")]
    InvalidRole {
        /// Raw role value.
        value: String,
    },
    /// A grantee type string was not recognised.
    #[error("invalid grantee type")]
    InvalidGranteeType {
        /// Raw grantee type value.
        value: String,
    },
    /// A file record violated a structural invariant.
    #[error("invalid file record")]
    InvalidFileRecord {
        /// Identifier of the offending file.
        file_id: String,
        /// Static reason for the failure.
        reason: &'static str,
    },
    /// The principal address pattern failed to compile.
    #[error("principal pattern failed to compile")]
    PatternCompile {
        /// Compiler diagnostic.
        message: String,
    },
}

/// Convenience alias for model results.
pub type ModelResult<T> = Result<T, ModelError>;
