//! Run orchestration: validate, scan, analyze, confirm, revoke, record.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use offboard_cache::{CacheRead, SnapshotCache};
use offboard_config::{RunConfig, RunMode};
use offboard_core::{
    CandidateRef, Clock, FileId, FileSource, Outcome, Principal, RunSummary, Sleeper, SystemClock,
    TokioSleeper,
};
use offboard_events::{Event, EventBus};
use offboard_telemetry::Metrics;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analyzer::{AccessAnalyzer, AccessSummary};
use crate::audit::{AuditRecord, AuditRecorder, NullAuditRecorder};
use crate::error::{EngineError, EngineResult};
use crate::retry::Retrier;
use crate::revocation::{CancellationFlag, EngineRun, RevocationEngine};
use crate::scanner::{Inventory, InventoryOrigin, InventoryScanner, ScanOptions};

/// What the caller is asked to approve at the checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmationRequest {
    /// Target principal.
    pub principal: String,
    /// Grants that would be removed.
    pub revocable: usize,
    /// Ownership grants that stay untouched.
    pub protected: usize,
    /// Grants already removed by an earlier run.
    pub absent: usize,
    /// Age of the inventory the decision is based on, in seconds.
    pub snapshot_age_secs: u64,
}

/// Checkpoint between analysis and the first destructive call.
#[async_trait]
pub trait Confirmation: Send + Sync {
    /// Whether removal may proceed.
    async fn confirm(&self, request: &ConfirmationRequest) -> bool;
}

/// Approves every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

#[async_trait]
impl Confirmation for AutoConfirm {
    async fn confirm(&self, _request: &ConfirmationRequest) -> bool {
        true
    }
}

/// Declines every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverConfirm;

#[async_trait]
impl Confirmation for NeverConfirm {
    async fn confirm(&self, _request: &ConfirmationRequest) -> bool {
        false
    }
}

/// Everything a finished run reports upward.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Run identifier shared with events and the audit trail.
    pub run_id: Uuid,
    /// Normalised principal.
    pub principal: String,
    /// Mode the run executed in.
    pub mode: RunMode,
    /// Where the inventory came from.
    pub origin: InventoryOrigin,
    /// Capture time of the inventory snapshot.
    pub snapshot_captured_at: DateTime<Utc>,
    /// Snapshot age when the scan finished.
    pub snapshot_age_secs: u64,
    /// Files left out of the inventory because their sharing list could not
    /// be read.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unreadable_files: Vec<FileId>,
    /// Candidates in processing order.
    pub candidates: Vec<CandidateRef>,
    /// Outcome log in processing order.
    pub outcomes: Vec<Outcome>,
    /// Counts over `outcomes`.
    pub summary: RunSummary,
    /// Access profile of the principal.
    pub access: AccessSummary,
    /// Whether the checkpoint was passed.
    pub confirmed: bool,
    /// Whether processing stopped before every candidate was considered.
    pub cancelled: bool,
}

impl RunReport {
    /// Whether any candidate ended in failure.
    #[must_use]
    pub const fn has_failures(&self) -> bool {
        self.summary.failed > 0
    }
}

/// Wires scanner, analyzer, engine, and recorder into one run.
pub struct RevocationPipeline {
    source: Arc<dyn FileSource>,
    cache: Option<Arc<dyn SnapshotCache>>,
    recorder: Arc<dyn AuditRecorder>,
    confirmation: Arc<dyn Confirmation>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    events: EventBus,
    metrics: Metrics,
    cancel: CancellationFlag,
}

impl RevocationPipeline {
    /// Pipeline over `source` with no cache, no audit sink, the system clock,
    /// and a checkpoint that declines every destructive run.
    #[must_use]
    pub fn new(source: Arc<dyn FileSource>, events: EventBus, metrics: Metrics) -> Self {
        Self {
            source,
            cache: None,
            recorder: Arc::new(NullAuditRecorder),
            confirmation: Arc::new(NeverConfirm),
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
            events,
            metrics,
            cancel: CancellationFlag::new(),
        }
    }

    /// Use `cache` for inventory snapshots.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn SnapshotCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Send audit records to `recorder`.
    #[must_use]
    pub fn with_recorder(mut self, recorder: Arc<dyn AuditRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Ask `confirmation` before revoking.
    #[must_use]
    pub fn with_confirmation(mut self, confirmation: Arc<dyn Confirmation>) -> Self {
        self.confirmation = confirmation;
        self
    }

    /// Use `clock` for timestamps and snapshot age.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use `sleeper` for retry backoff.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Flag that stops revocation between attempts.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationFlag {
        &self.cancel
    }

    /// Event bus the run publishes to.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Execute one run.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidPrincipal`] before scanning when the
    /// principal is malformed, and [`EngineError::SourceUnavailable`] when no
    /// inventory can be obtained. Per-candidate failures are reported in the
    /// returned [`RunReport`], never as errors.
    pub async fn run(&self, config: &RunConfig) -> EngineResult<RunReport> {
        let started = Instant::now();
        let principal =
            Principal::parse(&config.principal).map_err(|_| EngineError::InvalidPrincipal {
                value: config.principal.clone(),
            })?;

        let run_id = Uuid::new_v4();
        info!(%run_id, principal = %principal.email(), mode = %config.mode, "run started");
        self.events.publish(Event::RunStarted {
            run_id,
            principal: principal.email().to_string(),
            mode: config.mode.as_str().to_string(),
        });
        self.record(&AuditRecord::RunStarted {
            run_id,
            principal: principal.email().to_string(),
            mode: config.mode.as_str().to_string(),
            at: self.clock.now(),
        })
        .await;

        let inventory = match self.scanner(config).scan(&scan_options(config)).await {
            Ok(inventory) => inventory,
            Err(err) => {
                warn!(%run_id, error = %err, "run aborted before analysis");
                self.record(&AuditRecord::RunAborted {
                    run_id,
                    reason: abort_reason(&err),
                    at: self.clock.now(),
                })
                .await;
                return Err(err);
            }
        };

        let candidates = AccessAnalyzer::find_candidates(&principal, &inventory.snapshot);
        let access = AccessAnalyzer::summarize(&principal, &inventory.snapshot, &candidates);
        self.events.publish(Event::CandidatesFound {
            principal: principal.email().to_string(),
            revocable: access.revocable,
            protected: access.protected,
            absent: access.absent,
        });
        info!(
            %run_id,
            revocable = access.revocable,
            protected = access.protected,
            absent = access.absent,
            "analysis complete"
        );
        let references: Vec<CandidateRef> =
            candidates.iter().map(|candidate| candidate.reference()).collect();

        let (engine_run, confirmed) = match config.mode {
            RunMode::AuditOnly => (EngineRun::default(), false),
            RunMode::DryRun => {
                let run = self
                    .engine(config)
                    .process(run_id, candidates, true, self.recorder.as_ref())
                    .await;
                (run, true)
            }
            RunMode::Revoke => {
                if self.checkpoint(&principal, &access, &inventory).await {
                    let run = self
                        .engine(config)
                        .process(run_id, candidates, false, self.recorder.as_ref())
                        .await;
                    self.write_back(config, &inventory, &run).await;
                    (run, true)
                } else {
                    info!(%run_id, "revocation declined at checkpoint");
                    (EngineRun::default(), false)
                }
            }
        };

        let summary = engine_run.summary;
        self.record(&AuditRecord::RunFinished {
            run_id,
            summary,
            cancelled: engine_run.cancelled,
            at: self.clock.now(),
        })
        .await;
        if engine_run.cancelled {
            self.events.publish(Event::RunCancelled {
                run_id,
                processed: engine_run.outcomes.len(),
            });
        } else {
            self.events.publish(Event::RunCompleted {
                run_id,
                total: summary.total,
                success: summary.success,
                failed: summary.failed,
                skipped: summary.skipped,
            });
        }
        self.metrics.observe_run_duration(started.elapsed());
        info!(
            %run_id,
            total = summary.total,
            success = summary.success,
            failed = summary.failed,
            skipped = summary.skipped,
            cancelled = engine_run.cancelled,
            "run finished"
        );

        Ok(RunReport {
            run_id,
            principal: principal.email().to_string(),
            mode: config.mode,
            origin: inventory.origin,
            snapshot_captured_at: inventory.snapshot.captured_at,
            snapshot_age_secs: inventory.age.as_secs(),
            unreadable_files: inventory.unreadable.clone(),
            candidates: references,
            outcomes: engine_run.outcomes,
            summary,
            access,
            confirmed,
            cancelled: engine_run.cancelled,
        })
    }

    fn scanner(&self, config: &RunConfig) -> InventoryScanner {
        let scanner = InventoryScanner::new(
            Arc::clone(&self.source),
            Arc::clone(&self.clock),
            self.events.clone(),
            self.metrics.clone(),
        )
        .with_retry(config.retry, Arc::clone(&self.sleeper));
        match &self.cache {
            Some(cache) => scanner.with_cache(Arc::clone(cache)),
            None => scanner,
        }
    }

    fn engine(&self, config: &RunConfig) -> RevocationEngine {
        RevocationEngine::new(
            Arc::clone(&self.source),
            Arc::clone(&self.clock),
            Retrier::new(config.retry, Arc::clone(&self.sleeper)),
            config.workers,
            self.events.clone(),
            self.metrics.clone(),
        )
        .with_cancellation(self.cancel.clone())
    }

    async fn checkpoint(
        &self,
        principal: &Principal,
        access: &AccessSummary,
        inventory: &Inventory,
    ) -> bool {
        if access.revocable == 0 {
            return true;
        }
        self.events.publish(Event::AwaitingConfirmation {
            revocable: access.revocable,
        });
        let request = ConfirmationRequest {
            principal: principal.email().to_string(),
            revocable: access.revocable,
            protected: access.protected,
            absent: access.absent,
            snapshot_age_secs: inventory.age.as_secs(),
        };
        self.confirmation.confirm(&request).await
    }

    /// Supersede the cached snapshot so later runs see removed grants in the
    /// ledger. The successor keeps the original expiry.
    ///
    /// A cached snapshot captured after this run's inventory wins and is left
    /// alone. One with the same capture time is extended, so ledgers written
    /// by concurrent runs over the same inventory are merged.
    async fn write_back(&self, config: &RunConfig, inventory: &Inventory, run: &EngineRun) {
        if run.revoked.is_empty() || !config.use_cache {
            return;
        }
        let Some(cache) = &self.cache else {
            return;
        };
        if !inventory.unreadable.is_empty() {
            debug!(scope = %inventory.snapshot.scope, "inventory incomplete; ledger not cached");
            return;
        }

        let successor = match cache.read(&inventory.key).await {
            CacheRead::Fresh(current) | CacheRead::Expired(current)
                if current.captured_at > inventory.snapshot.captured_at =>
            {
                info!(
                    scope = %current.scope,
                    cached_at = %current.captured_at,
                    "newer snapshot cached meanwhile; ledger not written"
                );
                return;
            }
            CacheRead::Fresh(current) | CacheRead::Expired(current)
                if current.captured_at == inventory.snapshot.captured_at =>
            {
                current.superseded_with_revocations(&run.revoked)
            }
            _ => inventory.snapshot.superseded_with_revocations(&run.revoked),
        };
        let Some(remaining) = successor.remaining_ttl(self.clock.now()) else {
            debug!(scope = %successor.scope, "snapshot already expired; ledger not cached");
            return;
        };
        if let Err(err) = cache.put(&inventory.key, &successor, remaining).await {
            warn!(error = %err, scope = %successor.scope, "failed to record revocations in cache");
        }
    }

    async fn record(&self, record: &AuditRecord) {
        if let Err(err) = self.recorder.append(record).await {
            self.metrics.inc_audit_failure();
            warn!(error = %err, "failed to append audit record");
        }
    }
}

fn scan_options(config: &RunConfig) -> ScanOptions {
    ScanOptions {
        scope: config.scope.clone(),
        ttl: config.cache_ttl,
        use_cache: config.use_cache,
        allow_stale: config.allow_stale,
        force_refresh: config.force_refresh,
        fetch_concurrency: config.fetch_concurrency,
    }
}

fn abort_reason(err: &EngineError) -> String {
    match err {
        EngineError::SourceUnavailable { source, .. } => format!("{err}: {}", source.describe()),
        other => other.to_string(),
    }
}
