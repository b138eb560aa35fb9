//! Default values for every configuration section.

/// Scan scope used when none is configured (the authenticated account).
pub(crate) const SCOPE: &str = "me";
/// Drive-v3-shaped API root.
pub(crate) const BASE_URL: &str = "https://www.googleapis.com/drive/v3";
/// Files requested per listing page.
pub(crate) const PAGE_SIZE: u32 = 100;
/// Concurrent `list_permissions` calls while completing a page.
pub(crate) const FETCH_CONCURRENCY: usize = 8;
/// Per-request timeout for the HTTP source.
pub(crate) const REQUEST_TIMEOUT_SECS: u64 = 30;
/// Snapshot cache directory.
pub(crate) const CACHE_DIR: &str = ".offboard/cache";
/// Snapshot time-to-live (seven days).
pub(crate) const CACHE_TTL_SECS: u64 = 7 * 24 * 60 * 60;
/// Concurrent revocation attempts.
pub(crate) const WORKERS: usize = 4;
/// Delete attempts per candidate, including the first.
pub(crate) const RETRY_MAX_ATTEMPTS: u32 = 5;
/// Backoff before the second attempt.
pub(crate) const RETRY_BASE_DELAY_MS: u64 = 500;
/// Backoff growth factor.
pub(crate) const RETRY_MULTIPLIER: f64 = 2.0;
/// Backoff ceiling.
pub(crate) const RETRY_MAX_DELAY_MS: u64 = 30_000;
/// JSON-lines audit trail.
pub(crate) const AUDIT_LOG: &str = ".offboard/audit.jsonl";
/// Log level when `RUST_LOG` is unset.
pub(crate) const LOG_LEVEL: &str = "info";
