//! Inventory scanner: cache first, then full paginated retrieval.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{StreamExt, TryStreamExt, stream};
use offboard_cache::{CacheKey, CacheRead, SnapshotCache};
use offboard_config::RetryPolicy;
use offboard_core::{
    Clock, FileId, FileRecord, FileSource, Sleeper, Snapshot, SourceError, TokioSleeper,
};
use offboard_events::{Event, EventBus};
use offboard_telemetry::Metrics;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::retry::Retrier;

/// Where the scanned inventory came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InventoryOrigin {
    /// Fresh cached snapshot.
    Cache,
    /// Retrieved from the source during this scan.
    Remote,
    /// Expired cached snapshot accepted because the source was unreachable.
    StaleCache,
}

impl InventoryOrigin {
    /// Stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Remote => "remote",
            Self::StaleCache => "stale_cache",
        }
    }
}

/// Per-scan options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    /// Scan scope; keys the cache.
    pub scope: String,
    /// Time-to-live for a snapshot written by this scan.
    pub ttl: Duration,
    /// Consult and write the cache.
    pub use_cache: bool,
    /// Accept an expired snapshot when the source is unreachable.
    pub allow_stale: bool,
    /// Skip the cache read but still write back.
    pub force_refresh: bool,
    /// Concurrent `list_permissions` calls.
    pub fetch_concurrency: usize,
}

/// Scan result.
#[derive(Debug, Clone)]
pub struct Inventory {
    /// Snapshot the run operates on.
    pub snapshot: Arc<Snapshot>,
    /// Where it came from.
    pub origin: InventoryOrigin,
    /// Snapshot age when the scan finished.
    pub age: Duration,
    /// Cache key for the scope.
    pub key: CacheKey,
    /// Files left out because their sharing list could not be read.
    pub unreadable: Vec<FileId>,
}

/// Files gathered by a remote scan.
struct Retrieved {
    files: Vec<FileRecord>,
    unreadable: Vec<FileId>,
}

enum Completed {
    Listed(FileRecord),
    Vanished,
    Unreadable(FileId),
}

/// Retrieves the file/permission inventory.
pub struct InventoryScanner {
    source: Arc<dyn FileSource>,
    cache: Option<Arc<dyn SnapshotCache>>,
    clock: Arc<dyn Clock>,
    retrier: Retrier,
    events: EventBus,
    metrics: Metrics,
}

impl InventoryScanner {
    /// Scanner without a cache and with the default retry policy.
    #[must_use]
    pub fn new(
        source: Arc<dyn FileSource>,
        clock: Arc<dyn Clock>,
        events: EventBus,
        metrics: Metrics,
    ) -> Self {
        Self {
            source,
            cache: None,
            clock,
            retrier: Retrier::new(RetryPolicy::default(), Arc::new(TokioSleeper)),
            events,
            metrics,
        }
    }

    /// Attach a snapshot cache.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn SnapshotCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Retry transient listing failures with `policy`.
    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        self.retrier = Retrier::new(policy, sleeper);
        self
    }

    /// Produce the inventory for `options.scope`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SourceUnavailable`] when retrieval fails and no
    /// acceptable cached snapshot exists.
    pub async fn scan(&self, options: &ScanOptions) -> EngineResult<Inventory> {
        let key = CacheKey::for_scope(&options.scope);
        let cache = self.cache.as_ref().filter(|_| options.use_cache);
        self.events.publish(Event::ScanStarted {
            scope: options.scope.clone(),
        });

        let mut expired_available = false;
        if let Some(cache) = cache
            && !options.force_refresh
        {
            let read = cache.read(&key).await;
            self.metrics.inc_cache_lookup(read.label());
            match read {
                CacheRead::Fresh(snapshot) => {
                    let age = snapshot.age(self.clock.now());
                    info!(scope = %options.scope, age_secs = age.as_secs(), "serving cached inventory");
                    self.events.publish(Event::CacheHit {
                        scope: options.scope.clone(),
                        age_secs: age.as_secs(),
                    });
                    return Ok(self.finish(key, snapshot, InventoryOrigin::Cache, Vec::new()));
                }
                CacheRead::Expired(_) => {
                    expired_available = true;
                    self.publish_miss(&options.scope, "expired");
                }
                CacheRead::Miss(reason) => self.publish_miss(&options.scope, reason.as_str()),
            }
        } else if cache.is_some() {
            self.publish_miss(&options.scope, "refresh");
        }

        match self.fetch_remote(options).await {
            Ok(retrieved) => {
                let snapshot =
                    Snapshot::new(&options.scope, self.clock.now(), options.ttl, retrieved.files);
                if let Some(cache) = cache {
                    if retrieved.unreadable.is_empty() {
                        if let Err(err) = cache.put(&key, &snapshot, options.ttl).await {
                            warn!(error = %err, scope = %options.scope, "failed to write inventory snapshot");
                        }
                    } else {
                        warn!(
                            scope = %options.scope,
                            unreadable = retrieved.unreadable.len(),
                            "inventory incomplete; snapshot not cached"
                        );
                    }
                }
                Ok(self.finish(key, snapshot, InventoryOrigin::Remote, retrieved.unreadable))
            }
            Err((operation, source)) => {
                warn!(
                    error = %source,
                    detail = %source.describe(),
                    scope = %options.scope,
                    "inventory retrieval failed"
                );
                if options.allow_stale
                    && let Some(cache) = cache
                {
                    match cache.read(&key).await {
                        CacheRead::Fresh(snapshot) => {
                            return Ok(self.finish(
                                key,
                                snapshot,
                                InventoryOrigin::Cache,
                                Vec::new(),
                            ));
                        }
                        CacheRead::Expired(snapshot) => {
                            warn!(scope = %options.scope, "serving expired inventory snapshot");
                            return Ok(self.finish(
                                key,
                                snapshot,
                                InventoryOrigin::StaleCache,
                                Vec::new(),
                            ));
                        }
                        CacheRead::Miss(_) => {}
                    }
                }
                Err(EngineError::SourceUnavailable {
                    operation,
                    stale_available: expired_available,
                    source,
                })
            }
        }
    }

    fn publish_miss(&self, scope: &str, reason: &str) {
        debug!(scope, reason, "inventory cache miss");
        self.events.publish(Event::CacheMiss {
            scope: scope.to_string(),
            reason: reason.to_string(),
        });
    }

    fn finish(
        &self,
        key: CacheKey,
        snapshot: Snapshot,
        origin: InventoryOrigin,
        unreadable: Vec<FileId>,
    ) -> Inventory {
        let age = snapshot.age(self.clock.now());
        self.metrics.set_snapshot_age(age);
        self.events.publish(Event::ScanCompleted {
            scope: snapshot.scope.clone(),
            files: snapshot.files.len(),
            origin: origin.as_str().to_string(),
        });
        Inventory {
            snapshot: Arc::new(snapshot),
            origin,
            age,
            key,
            unreadable,
        }
    }

    async fn fetch_remote(
        &self,
        options: &ScanOptions,
    ) -> Result<Retrieved, (&'static str, SourceError)> {
        let mut files = Vec::new();
        let mut unreadable = Vec::new();
        let mut seen_tokens = HashSet::new();
        let mut token: Option<String> = None;
        let mut page_number: u32 = 0;

        loop {
            page_number += 1;
            let attempted = self
                .retrier
                .run(|| self.source.list_files(token.as_deref()), |_, _| {
                    self.metrics.inc_retry();
                })
                .await;
            let page = attempted.result.map_err(|err| ("list_files", err))?;
            self.metrics.add_files_scanned(page.files.len());
            self.events.publish(Event::PageFetched {
                page: page_number,
                files: page.files.len(),
            });
            debug!(page = page_number, files = page.files.len(), "fetched inventory page");

            if page.permissions_included {
                files.extend(page.files);
            } else {
                for completed in self
                    .complete_permissions(page.files, options.fetch_concurrency)
                    .await?
                {
                    match completed {
                        Completed::Listed(file) => files.push(file),
                        Completed::Vanished => {}
                        Completed::Unreadable(file_id) => unreadable.push(file_id),
                    }
                }
            }

            match page.next_page_token {
                Some(next) if !seen_tokens.insert(next.clone()) => {
                    return Err((
                        "list_files",
                        SourceError::InvalidResponse {
                            operation: "list_files",
                            detail: format!("page token {next} repeated"),
                        },
                    ));
                }
                Some(next) => token = Some(next),
                None => break,
            }
        }

        for file in &files {
            if let Err(err) = file.validate() {
                warn!(file_id = %file.id, error = ?err, "file record violates inventory invariants");
            }
        }
        Ok(Retrieved { files, unreadable })
    }

    /// List each file's permissions. Only exhausted transient failures and
    /// an unreachable source abort the scan; a denied or undecodable listing
    /// drops that one file.
    async fn complete_permissions(
        &self,
        files: Vec<FileRecord>,
        concurrency: usize,
    ) -> Result<Vec<Completed>, (&'static str, SourceError)> {
        stream::iter(files)
            .map(|mut file| async move {
                let attempted = self
                    .retrier
                    .run(|| self.source.list_permissions(&file.id), |_, _| {
                        self.metrics.inc_retry();
                    })
                    .await;
                match attempted.result {
                    Ok(permissions) => {
                        file.permissions = permissions;
                        Ok(Completed::Listed(file))
                    }
                    Err(SourceError::NotFound { .. }) => {
                        debug!(file_id = %file.id, "file vanished during scan");
                        Ok(Completed::Vanished)
                    }
                    Err(
                        err @ (SourceError::PermissionDenied { .. }
                        | SourceError::InvalidResponse { .. }),
                    ) => {
                        warn!(
                            file_id = %file.id,
                            error = %err,
                            detail = %err.describe(),
                            "permissions unreadable; file left out of inventory"
                        );
                        self.metrics.inc_unreadable_file();
                        self.events.publish(Event::PermissionsUnreadable {
                            file_id: file.id.to_string(),
                            reason: err.describe(),
                        });
                        Ok(Completed::Unreadable(file.id))
                    }
                    Err(err) => Err(("list_permissions", err)),
                }
            })
            .buffered(concurrency.max(1))
            .try_collect()
            .await
    }
}
