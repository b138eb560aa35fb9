//! Snapshot cache contract.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use offboard_core::Snapshot;
use serde::Serialize;

use crate::error::CacheResult;
use crate::key::CacheKey;

/// Why a lookup produced no snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissReason {
    /// No entry under the key.
    Absent,
    /// The entry failed verification and was evicted.
    Corrupted,
    /// The entry could not be read.
    Unreadable,
}

impl MissReason {
    #[must_use]
    /// Stable label for logs and metrics.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Absent => "miss",
            Self::Corrupted => "corrupted",
            Self::Unreadable => "unreadable",
        }
    }
}

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheRead {
    /// Entry within its ttl.
    Fresh(Snapshot),
    /// Entry past its ttl. Never served unless the caller opts into stale
    /// data; it stays stored until superseded or purged.
    Expired(Snapshot),
    /// Nothing usable.
    Miss(MissReason),
}

impl CacheRead {
    #[must_use]
    /// Stable label for logs and metrics.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Fresh(_) => "hit",
            Self::Expired(_) => "expired",
            Self::Miss(reason) => reason.as_str(),
        }
    }
}

/// Metadata describing one stored entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntryInfo {
    /// Entry key.
    pub key: String,
    /// Scan scope recorded in the entry, when readable.
    pub scope: Option<String>,
    /// Write time.
    pub created_at: Option<DateTime<Utc>>,
    /// Expiry time.
    pub expires_at: Option<DateTime<Utc>>,
    /// Files in the snapshot.
    pub file_count: Option<usize>,
    /// Stored size in bytes.
    pub size_bytes: u64,
    /// Whether the entry parses and passes verification.
    pub valid: bool,
    /// Whether the entry is past its ttl.
    pub expired: bool,
}

/// Keyed store for inventory snapshots.
///
/// Writes for a single key are mutually exclusive and replace the previous
/// entry atomically; a reader sees either the old or the new entry in full.
#[async_trait]
pub trait SnapshotCache: Send + Sync {
    /// Look up `key`, distinguishing fresh, expired, and missing entries.
    /// Entries that fail verification are evicted and reported as a miss.
    async fn read(&self, key: &CacheKey) -> CacheRead;

    /// Fresh snapshot for `key`, if any.
    async fn get(&self, key: &CacheKey) -> Option<Snapshot> {
        match self.read(key).await {
            CacheRead::Fresh(snapshot) => Some(snapshot),
            CacheRead::Expired(_) | CacheRead::Miss(_) => None,
        }
    }

    /// Store `snapshot` under `key`, superseding any previous entry. The entry
    /// expires `ttl` after the write.
    async fn put(&self, key: &CacheKey, snapshot: &Snapshot, ttl: Duration) -> CacheResult<()>;

    /// Remove the entry for `key`. Returns whether one existed.
    async fn invalidate(&self, key: &CacheKey) -> CacheResult<bool>;

    /// Describe every stored entry, ordered by key.
    async fn entries(&self) -> CacheResult<Vec<CacheEntryInfo>>;

    /// Remove expired and invalid entries. Returns how many were removed.
    async fn purge_expired(&self) -> CacheResult<usize>;

    /// Remove every entry. Returns how many were removed.
    async fn clear(&self) -> CacheResult<usize>;
}
