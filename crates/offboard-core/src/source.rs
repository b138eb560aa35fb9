//! Contract for the remote file/permission API.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{FileId, FileRecord, PermissionId, PermissionRecord};

/// One page of the file listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilePage {
    /// Files on this page.
    pub files: Vec<FileRecord>,
    /// Whether each file already carries its permissions; when `false` the
    /// scanner completes them with [`FileSource::list_permissions`].
    pub permissions_included: bool,
    /// Token for the next page, `None` on the last page.
    pub next_page_token: Option<String>,
}

/// Typed failures reported by a [`FileSource`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The source throttled the request.
    #[error("source rate limited the request")]
    RateLimited {
        /// Operation that was throttled.
        operation: &'static str,
        /// Server-suggested wait, when provided.
        retry_after: Option<Duration>,
    },
    /// The request did not complete in time.
    #[error("source request timed out")]
    Timeout {
        /// Operation that timed out.
        operation: &'static str,
    },
    /// Temporary server-side failure.
    #[error("source reported a transient failure")]
    Transient {
        /// Operation that failed.
        operation: &'static str,
        /// Status or message reported by the source.
        detail: String,
    },
    /// The file or permission does not exist.
    #[error("source resource not found")]
    NotFound {
        /// Operation that failed.
        operation: &'static str,
    },
    /// The caller may not perform the operation.
    #[error("source denied the operation")]
    PermissionDenied {
        /// Operation that was denied.
        operation: &'static str,
        /// Reason code reported by the source.
        reason: Option<String>,
    },
    /// The source could not be reached or rejected the request outright.
    #[error("source unavailable")]
    Unavailable {
        /// Operation that failed.
        operation: &'static str,
        /// Transport or status detail.
        detail: String,
    },
    /// The source answered with a payload that could not be interpreted.
    #[error("source returned an invalid response")]
    InvalidResponse {
        /// Operation that failed.
        operation: &'static str,
        /// Decoder detail.
        detail: String,
    },
}

impl SourceError {
    #[must_use]
    /// Whether the failure may succeed on retry.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Timeout { .. } | Self::Transient { .. }
        )
    }

    #[must_use]
    /// Server-suggested retry delay, if any.
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    #[must_use]
    /// Stable label for logs and metrics.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Timeout { .. } => "timeout",
            Self::Transient { .. } => "transient",
            Self::NotFound { .. } => "not_found",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::Unavailable { .. } => "unavailable",
            Self::InvalidResponse { .. } => "invalid_response",
        }
    }

    #[must_use]
    /// Operation the error was raised for.
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::RateLimited { operation, .. }
            | Self::Timeout { operation }
            | Self::Transient { operation, .. }
            | Self::NotFound { operation }
            | Self::PermissionDenied { operation, .. }
            | Self::Unavailable { operation, .. }
            | Self::InvalidResponse { operation, .. } => operation,
        }
    }

    #[must_use]
    /// One-line description including the source-provided detail, suitable
    /// for the outcome log.
    pub fn describe(&self) -> String {
        let extra = match self {
            Self::Transient { detail, .. }
            | Self::Unavailable { detail, .. }
            | Self::InvalidResponse { detail, .. } => Some(detail.as_str()),
            Self::PermissionDenied { reason, .. } => reason.as_deref(),
            _ => None,
        };
        match extra {
            Some(extra) => format!("{}: {} ({extra})", self.kind(), self.operation()),
            None => format!("{}: {}", self.kind(), self.operation()),
        }
    }
}

/// Convenience alias for source results.
pub type SourceResult<T> = Result<T, SourceError>;

/// Remote file/permission API.
#[async_trait]
pub trait FileSource: Send + Sync {
    /// Fetch one page of the file listing.
    async fn list_files(&self, page_token: Option<&str>) -> SourceResult<FilePage>;

    /// Fetch the current permissions of one file.
    async fn list_permissions(&self, file_id: &FileId) -> SourceResult<Vec<PermissionRecord>>;

    /// Remove one permission.
    async fn delete_permission(
        &self,
        file_id: &FileId,
        permission_id: &PermissionId,
    ) -> SourceResult<()>;
}
