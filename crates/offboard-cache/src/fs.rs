//! On-disk snapshot cache: one envelope file per key.
//!
//! # Design
//! - Writes for a key hold that key's async mutex, go to a temp file in the
//!   cache directory, are synced, then renamed over the entry.
//! - Reads take no lock; the rename guarantees they see a whole entry.
//! - Entries that fail verification are evicted under the key lock after a
//!   second read confirms the failure.
//! - A key's mutex is dropped from the lock table once its last holder
//!   releases it.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use offboard_core::{Clock, Snapshot};
use tokio::io::AsyncWriteExt;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::codec::{self, Compression};
use crate::error::{CacheError, CacheResult};
use crate::key::CacheKey;
use crate::store::{CacheEntryInfo, CacheRead, MissReason, SnapshotCache};

const ENTRY_SUFFIX: &str = ".snapshot.json";

/// Directory-backed [`SnapshotCache`].
#[derive(Debug)]
pub struct FsSnapshotCache {
    root: PathBuf,
    clock: Arc<dyn Clock>,
    compression: Compression,
    locks: Mutex<HashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl FsSnapshotCache {
    /// Cache rooted at `root`; the directory is created on first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            root: root.into(),
            clock,
            compression: Compression::Gzip,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Override the payload encoding used for new entries.
    #[must_use]
    pub const fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Cache directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File holding the entry for `key`.
    #[must_use]
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{key}{ENTRY_SUFFIX}"))
    }

    async fn lock_key(&self, key: &CacheKey) -> KeyGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        KeyGuard {
            cache: self,
            key: key.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    async fn evict_if_still_invalid(&self, key: &CacheKey) {
        let _guard = self.lock_key(key).await;
        let path = self.entry_path(key);
        let still_invalid = match tokio::fs::read(&path).await {
            Ok(bytes) => codec::decode(key, &bytes).is_err(),
            Err(_) => false,
        };
        if still_invalid {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => info!(key = %key, path = %path.display(), "evicted corrupted cache entry"),
                Err(err) => warn!(key = %key, error = %err, "failed to evict corrupted cache entry"),
            }
        }
    }

    fn stored_keys(&self) -> CacheResult<Vec<CacheKey>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|source| CacheError::Walkdir {
                path: self.root.clone(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            let Some(stem) = name.strip_suffix(ENTRY_SUFFIX) else {
                continue;
            };
            match CacheKey::parse(stem) {
                Ok(key) => keys.push(key),
                Err(_) => debug!(file = %name, "ignoring foreign file in cache directory"),
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn describe(&self, key: &CacheKey) -> CacheResult<Option<CacheEntryInfo>> {
        let path = self.entry_path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CacheError::Io {
                    operation: "cache.describe",
                    path,
                    source,
                });
            }
        };
        let size_bytes = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        let now = self.clock.now();
        let info = match codec::read_envelope(&bytes) {
            Ok(envelope) => CacheEntryInfo {
                key: key.to_string(),
                scope: Some(envelope.scope.clone()),
                created_at: Some(envelope.created_at),
                expires_at: envelope.expires_at(),
                file_count: Some(envelope.file_count),
                size_bytes,
                valid: codec::decode(key, &bytes).is_ok(),
                expired: envelope.is_expired(now),
            },
            Err(_) => CacheEntryInfo {
                key: key.to_string(),
                scope: None,
                created_at: None,
                expires_at: None,
                file_count: None,
                size_bytes,
                valid: false,
                expired: false,
            },
        };
        Ok(Some(info))
    }

    async fn write_entry(&self, key: &CacheKey, bytes: &[u8]) -> CacheResult<()> {
        let io_error = |operation: &'static str, path: &Path| {
            let path = path.to_path_buf();
            move |source: io::Error| CacheError::Io {
                operation,
                path,
                source,
            }
        };

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(io_error("cache.create_dir", &self.root))?;

        let path = self.entry_path(key);
        let temp = self
            .root
            .join(format!(".{key}.{}.tmp", std::process::id()));
        let mut file = tokio::fs::File::create(&temp)
            .await
            .map_err(io_error("cache.create_temp", &temp))?;
        let written = async {
            file.write_all(bytes).await?;
            file.sync_all().await
        }
        .await;
        drop(file);
        if let Err(source) = written {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(io_error("cache.write_temp", &temp)(source));
        }
        if let Err(source) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(io_error("cache.rename", &path)(source));
        }
        Ok(())
    }
}

/// Holds a key's write lock; prunes the lock table on release.
struct KeyGuard<'a> {
    cache: &'a FsSnapshotCache,
    key: CacheKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self
            .cache
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Waiters hold their own clone, so a count of one means nobody else
        // can be queued on this mutex.
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.key);
        }
    }
}

#[async_trait]
impl SnapshotCache for FsSnapshotCache {
    async fn read(&self, key: &CacheKey) -> CacheRead {
        let path = self.entry_path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return CacheRead::Miss(MissReason::Absent);
            }
            Err(err) => {
                warn!(key = %key, path = %path.display(), error = %err, "cache entry unreadable");
                return CacheRead::Miss(MissReason::Unreadable);
            }
        };

        match codec::decode(key, &bytes) {
            Ok((envelope, snapshot)) => {
                if envelope.is_expired(self.clock.now()) {
                    debug!(key = %key, "cache entry expired");
                    CacheRead::Expired(snapshot)
                } else {
                    CacheRead::Fresh(snapshot)
                }
            }
            Err(failure) => {
                warn!(key = %key, reason = failure.as_str(), "cache entry failed verification");
                self.evict_if_still_invalid(key).await;
                CacheRead::Miss(MissReason::Corrupted)
            }
        }
    }

    async fn put(&self, key: &CacheKey, snapshot: &Snapshot, ttl: Duration) -> CacheResult<()> {
        let bytes = codec::encode(key, snapshot, self.clock.now(), ttl, self.compression)?;
        let _guard = self.lock_key(key).await;
        self.write_entry(key, &bytes).await?;
        debug!(
            key = %key,
            files = snapshot.files.len(),
            ttl_secs = ttl.as_secs(),
            bytes = bytes.len(),
            "cache entry written"
        );
        Ok(())
    }

    async fn invalidate(&self, key: &CacheKey) -> CacheResult<bool> {
        let _guard = self.lock_key(key).await;
        let path = self.entry_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(CacheError::Io {
                operation: "cache.invalidate",
                path,
                source,
            }),
        }
    }

    async fn entries(&self) -> CacheResult<Vec<CacheEntryInfo>> {
        let mut infos = Vec::new();
        for key in self.stored_keys()? {
            if let Some(info) = self.describe(&key).await? {
                infos.push(info);
            }
        }
        Ok(infos)
    }

    async fn purge_expired(&self) -> CacheResult<usize> {
        let mut removed = 0;
        for info in self.entries().await? {
            if info.expired || !info.valid {
                let key = CacheKey::parse(&info.key)?;
                if self.invalidate(&key).await? {
                    removed += 1;
                }
            }
        }
        info!(removed, "purged expired cache entries");
        Ok(removed)
    }

    async fn clear(&self) -> CacheResult<usize> {
        let mut removed = 0;
        for key in self.stored_keys()? {
            if self.invalidate(&key).await? {
                removed += 1;
            }
        }
        info!(removed, "cleared cache");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offboard_test_support::{ManualClock, fixtures};

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn key_locks_are_released_after_use() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = Arc::new(FsSnapshotCache::new(
            dir.path(),
            Arc::new(ManualClock::new(fixtures::epoch())),
        ));
        let snapshot = fixtures::snapshot("me", fixtures::epoch(), vec![]);

        let mut writers = Vec::new();
        for index in 0..32 {
            let cache = Arc::clone(&cache);
            let snapshot = snapshot.clone();
            writers.push(tokio::spawn(async move {
                let key = CacheKey::for_scope(&format!("scope-{}", index % 4));
                cache.put(&key, &snapshot, Duration::from_secs(60)).await?;
                cache.invalidate(&key).await?;
                anyhow::Ok(())
            }));
        }
        for writer in writers {
            writer.await??;
        }

        assert_eq!(cache.tracked_locks(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn held_lock_stays_tracked_until_dropped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = FsSnapshotCache::new(
            dir.path(),
            Arc::new(ManualClock::new(fixtures::epoch())),
        );
        let key = CacheKey::for_scope("me");
        let guard = cache.lock_key(&key).await;
        assert_eq!(cache.tracked_locks(), 1);
        drop(guard);
        assert_eq!(cache.tracked_locks(), 0);
    }
}
