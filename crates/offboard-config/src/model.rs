//! Typed configuration models.

use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::ConfigError;

/// What a run is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    /// Report the principal's access; never removes anything.
    #[default]
    AuditOnly,
    /// Remove every revocable grant.
    Revoke,
    /// Evaluate everything and simulate removals.
    DryRun,
}

impl RunMode {
    #[must_use]
    /// Stable label matching the serialized form.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AuditOnly => "audit-only",
            Self::Revoke => "revoke",
            Self::DryRun => "dry-run",
        }
    }

    #[must_use]
    /// Whether the mode issues remote deletions.
    pub const fn is_destructive(self) -> bool {
        matches!(self, Self::Revoke)
    }
}

impl Display for RunMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "audit-only" | "audit" => Ok(Self::AuditOnly),
            "revoke" | "revoke-all" => Ok(Self::Revoke),
            "dry-run" => Ok(Self::DryRun),
            _ => Err(ConfigError::InvalidMode {
                value: value.to_string(),
            }),
        }
    }
}

/// Exponential backoff parameters for transient delete failures.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per candidate, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds.
    pub base_delay_ms: u64,
    /// Growth factor applied per further attempt.
    pub multiplier: f64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Randomise each delay within its upper half.
    pub jitter: bool,
}

impl RetryPolicy {
    #[must_use]
    /// Backoff after `attempt` (one-based) failed, before jitter.
    ///
    /// A server-provided `retry_after` takes precedence when it is longer.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let scaled = self.base_delay_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        let capped = scaled.min(self.max_delay_ms as f64).max(0.0) as u64;
        let delay = Duration::from_millis(capped);
        retry_after.map_or(delay, |hint| hint.max(delay))
    }

    #[must_use]
    /// Policy that never retries.
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            multiplier: 1.0,
            max_delay_ms: 0,
            jitter: false,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::RETRY_MAX_ATTEMPTS,
            base_delay_ms: defaults::RETRY_BASE_DELAY_MS,
            multiplier: defaults::RETRY_MULTIPLIER,
            max_delay_ms: defaults::RETRY_MAX_DELAY_MS,
            jitter: true,
        }
    }
}

/// Inventory retrieval settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Account identity the inventory belongs to; keys the cache.
    pub scope: String,
    /// Root URL of the file API.
    pub base_url: String,
    /// Files requested per page.
    pub page_size: u32,
    /// Concurrent permission fetches.
    pub fetch_concurrency: usize,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Act on permissions with domain administrator rights.
    pub admin_access: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            scope: defaults::SCOPE.to_string(),
            base_url: defaults::BASE_URL.to_string(),
            page_size: defaults::PAGE_SIZE,
            fetch_concurrency: defaults::FETCH_CONCURRENCY,
            request_timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
            admin_access: false,
        }
    }
}

/// Snapshot cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Whether the cache is consulted and written at all.
    pub enabled: bool,
    /// Directory holding one entry per scope.
    pub dir: PathBuf,
    /// Snapshot time-to-live in seconds.
    pub ttl_secs: u64,
    /// Serve an expired snapshot when the source is unreachable.
    pub allow_stale: bool,
    /// Gzip the stored payload.
    pub compression: bool,
}

impl CacheSettings {
    #[must_use]
    /// Time-to-live as a duration.
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from(defaults::CACHE_DIR),
            ttl_secs: defaults::CACHE_TTL_SECS,
            allow_stale: false,
            compression: true,
        }
    }
}

/// Revocation worker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RevocationSettings {
    /// Concurrent delete attempts.
    pub workers: usize,
    /// Backoff for transient failures.
    pub retry: RetryPolicy,
}

impl Default for RevocationSettings {
    fn default() -> Self {
        Self {
            workers: defaults::WORKERS,
            retry: RetryPolicy::default(),
        }
    }
}

/// Audit trail settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    /// JSON-lines file receiving one record per outcome.
    pub log_path: PathBuf,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from(defaults::AUDIT_LOG),
        }
    }
}

/// Preferred log rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStyle {
    /// Pretty in debug builds, JSON in release builds.
    #[default]
    Auto,
    /// Human-readable output.
    Pretty,
    /// Structured JSON output.
    Json,
}

/// Logging settings consumed by the binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Output style.
    pub format: LogStyle,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            format: LogStyle::Auto,
        }
    }
}

/// Complete configuration document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Inventory retrieval.
    pub scan: ScanSettings,
    /// Snapshot cache.
    pub cache: CacheSettings,
    /// Revocation workers and retry.
    pub revocation: RevocationSettings,
    /// Audit trail.
    pub audit: AuditSettings,
    /// Logging.
    pub logging: LoggingSettings,
}

impl AppConfig {
    #[must_use]
    /// Resolve the explicit values one run needs.
    pub fn run_config(&self, principal: impl Into<String>, mode: RunMode) -> RunConfig {
        RunConfig {
            principal: principal.into(),
            mode,
            scope: self.scan.scope.clone(),
            cache_ttl: self.cache.ttl(),
            use_cache: self.cache.enabled,
            allow_stale: self.cache.allow_stale,
            force_refresh: false,
            fetch_concurrency: self.scan.fetch_concurrency,
            workers: self.revocation.workers,
            retry: self.revocation.retry,
        }
    }
}

/// Explicit per-run parameters handed to the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Raw principal; validated by the pipeline before scanning.
    pub principal: String,
    /// What the run may do.
    pub mode: RunMode,
    /// Scan scope (cache key source).
    pub scope: String,
    /// Time-to-live for snapshots written by this run.
    pub cache_ttl: Duration,
    /// Consult and write the cache.
    pub use_cache: bool,
    /// Accept an expired snapshot when the source is unreachable.
    pub allow_stale: bool,
    /// Skip the cache read but still write back.
    pub force_refresh: bool,
    /// Concurrent permission fetches.
    pub fetch_concurrency: usize,
    /// Concurrent delete attempts.
    pub workers: usize,
    /// Backoff for transient failures.
    pub retry: RetryPolicy,
}
