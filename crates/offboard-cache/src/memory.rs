//! In-process snapshot cache.
//!
//! Entries are kept in their encoded envelope form so expiry, checksum, and
//! eviction behave exactly as they do on disk.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use offboard_core::{Clock, Snapshot};
use tokio::sync::RwLock;
use tracing::warn;

use crate::codec::{self, Compression};
use crate::error::CacheResult;
use crate::key::CacheKey;
use crate::store::{CacheEntryInfo, CacheRead, MissReason, SnapshotCache};

/// Map-backed [`SnapshotCache`] for tests and `--no-cache` style callers
/// that still want in-run reuse.
#[derive(Debug)]
pub struct MemorySnapshotCache {
    clock: Arc<dyn Clock>,
    entries: RwLock<BTreeMap<CacheKey, Vec<u8>>>,
}

impl MemorySnapshotCache {
    /// Empty cache using `clock` for expiry.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Replace the raw stored bytes for `key`.
    ///
    /// Lets callers seed entries written elsewhere (or damaged ones) without
    /// going through [`SnapshotCache::put`].
    pub async fn insert_raw(&self, key: &CacheKey, bytes: Vec<u8>) {
        self.entries.write().await.insert(key.clone(), bytes);
    }

    /// A `put` may land between the failed decode and the write lock; only
    /// an entry that still fails verification is removed.
    async fn evict_if_still_invalid(&self, key: &CacheKey) {
        let mut entries = self.entries.write().await;
        if entries
            .get(key)
            .is_some_and(|bytes| codec::decode(key, bytes).is_err())
        {
            entries.remove(key);
        }
    }
}

#[async_trait]
impl SnapshotCache for MemorySnapshotCache {
    async fn read(&self, key: &CacheKey) -> CacheRead {
        let decoded = {
            let entries = self.entries.read().await;
            let Some(bytes) = entries.get(key) else {
                return CacheRead::Miss(MissReason::Absent);
            };
            codec::decode(key, bytes)
        };
        match decoded {
            Ok((envelope, snapshot)) if envelope.is_expired(self.clock.now()) => {
                CacheRead::Expired(snapshot)
            }
            Ok((_, snapshot)) => CacheRead::Fresh(snapshot),
            Err(failure) => {
                warn!(key = %key, reason = failure.as_str(), "cache entry failed verification");
                self.evict_if_still_invalid(key).await;
                CacheRead::Miss(MissReason::Corrupted)
            }
        }
    }

    async fn put(&self, key: &CacheKey, snapshot: &Snapshot, ttl: Duration) -> CacheResult<()> {
        let bytes = codec::encode(key, snapshot, self.clock.now(), ttl, Compression::None)?;
        self.entries.write().await.insert(key.clone(), bytes);
        Ok(())
    }

    async fn invalidate(&self, key: &CacheKey) -> CacheResult<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn entries(&self) -> CacheResult<Vec<CacheEntryInfo>> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .map(|(key, bytes)| {
                let envelope = codec::read_envelope(bytes).ok();
                CacheEntryInfo {
                    key: key.to_string(),
                    scope: envelope.as_ref().map(|e| e.scope.clone()),
                    created_at: envelope.as_ref().map(|e| e.created_at),
                    expires_at: envelope.as_ref().and_then(codec::Envelope::expires_at),
                    file_count: envelope.as_ref().map(|e| e.file_count),
                    size_bytes: u64::try_from(bytes.len()).unwrap_or(u64::MAX),
                    valid: codec::decode(key, bytes).is_ok(),
                    expired: envelope.as_ref().is_some_and(|e| e.is_expired(now)),
                }
            })
            .collect())
    }

    async fn purge_expired(&self) -> CacheResult<usize> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, bytes| {
            codec::decode(key, bytes).is_ok_and(|(envelope, _)| !envelope.is_expired(now))
        });
        Ok(before - entries.len())
    }

    async fn clear(&self) -> CacheResult<usize> {
        let mut entries = self.entries.write().await;
        let removed = entries.len();
        entries.clear();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offboard_test_support::{ManualClock, fixtures};

    fn cache() -> (Arc<ManualClock>, MemorySnapshotCache) {
        let clock = Arc::new(ManualClock::new(fixtures::epoch()));
        let cache = MemorySnapshotCache::new(clock.clone());
        (clock, cache)
    }

    #[tokio::test]
    async fn fresh_until_ttl_then_expired() {
        let (clock, cache) = cache();
        let key = CacheKey::for_scope("me");
        let snapshot = fixtures::snapshot("me", fixtures::epoch(), vec![]);
        cache
            .put(&key, &snapshot, Duration::from_secs(30))
            .await
            .expect("put");

        clock.advance(Duration::from_secs(30));
        assert_eq!(cache.get(&key).await, Some(snapshot.clone()));

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.read(&key).await, CacheRead::Expired(snapshot));
        assert_eq!(cache.get(&key).await, None);
        assert_eq!(cache.purge_expired().await.expect("purge"), 1);
        assert_eq!(cache.read(&key).await, CacheRead::Miss(MissReason::Absent));
    }

    #[tokio::test]
    async fn garbage_is_evicted_as_corrupted() {
        let (_, cache) = cache();
        let key = CacheKey::for_scope("me");
        cache.insert_raw(&key, b"{}".to_vec()).await;
        assert_eq!(cache.read(&key).await, CacheRead::Miss(MissReason::Corrupted));
        assert!(cache.entries().await.expect("entries").is_empty());
    }

    #[tokio::test]
    async fn eviction_spares_an_entry_replaced_after_the_failed_decode() {
        let (_, cache) = cache();
        let key = CacheKey::for_scope("me");
        let snapshot = fixtures::snapshot("me", fixtures::epoch(), vec![]);
        cache.insert_raw(&key, b"{}".to_vec()).await;
        cache
            .put(&key, &snapshot, Duration::from_secs(60))
            .await
            .expect("put");

        cache.evict_if_still_invalid(&key).await;
        assert_eq!(cache.get(&key).await, Some(snapshot));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_put_survives_corrupted_read() {
        let (_, cache) = cache();
        let cache = Arc::new(cache);
        let key = CacheKey::for_scope("me");
        let files = (0..500)
            .map(|index| fixtures::shared_file(&format!("f{index}"), &["alice@example.com"]))
            .collect();
        let snapshot = fixtures::snapshot("me", fixtures::epoch(), files);

        for _ in 0..50 {
            cache.insert_raw(&key, b"{\"garbage\":true}".to_vec()).await;
            let reader = {
                let cache = Arc::clone(&cache);
                let key = key.clone();
                tokio::spawn(async move { cache.read(&key).await })
            };
            let writer = {
                let cache = Arc::clone(&cache);
                let key = key.clone();
                let snapshot = snapshot.clone();
                tokio::spawn(async move { cache.put(&key, &snapshot, Duration::from_secs(60)).await })
            };
            reader.await.expect("reader");
            writer.await.expect("writer").expect("put");
            assert_eq!(cache.get(&key).await, Some(snapshot.clone()));
        }
    }
}
