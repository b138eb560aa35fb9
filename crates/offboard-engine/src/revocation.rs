//! Per-candidate revocation state machine.
//!
//! Candidates are evaluated in parallel by a bounded pool, but their
//! outcomes are recorded strictly in candidate order. The engine is the
//! single writer of the outcome log.

use std::future::ready;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{StreamExt, stream};
use offboard_core::{
    CandidateDecision, Classification, Clock, FileSource, Outcome, RevokedGrant, Role, RunSummary,
    SkipReason, SourceError,
};
use offboard_events::{Event, EventBus};
use offboard_telemetry::Metrics;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audit::{AuditRecord, AuditRecorder};
use crate::retry::Retrier;

/// Shared stop signal checked before each new attempt.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// Unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. In-flight attempts still finish.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of processing a candidate list.
#[derive(Debug, Clone, Default)]
pub struct EngineRun {
    /// Outcome log in candidate order.
    pub outcomes: Vec<Outcome>,
    /// Grants confirmed gone (removed now or found already gone).
    pub revoked: Vec<RevokedGrant>,
    /// Whether processing stopped before every candidate was considered.
    pub cancelled: bool,
    /// Counts over `outcomes`.
    pub summary: RunSummary,
}

/// Drives candidates through evaluation, attempt, and outcome.
pub struct RevocationEngine {
    source: Arc<dyn FileSource>,
    clock: Arc<dyn Clock>,
    retrier: Retrier,
    workers: usize,
    events: EventBus,
    metrics: Metrics,
    cancel: CancellationFlag,
}

struct Resolved {
    outcome: Outcome,
    revoked: Option<RevokedGrant>,
}

impl RevocationEngine {
    /// Engine issuing at most `workers` concurrent delete attempts.
    #[must_use]
    pub fn new(
        source: Arc<dyn FileSource>,
        clock: Arc<dyn Clock>,
        retrier: Retrier,
        workers: usize,
        events: EventBus,
        metrics: Metrics,
    ) -> Self {
        Self {
            source,
            clock,
            retrier,
            workers: workers.max(1),
            events,
            metrics,
            cancel: CancellationFlag::new(),
        }
    }

    /// Share an externally owned cancellation flag.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Flag that stops this engine.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationFlag {
        &self.cancel
    }

    /// Process `candidates` and return the complete outcome log.
    ///
    /// Every candidate considered gets exactly one outcome. Audit failures
    /// are logged and counted but never stop processing.
    pub async fn process(
        &self,
        run_id: Uuid,
        candidates: Vec<CandidateDecision>,
        dry_run: bool,
        recorder: &dyn AuditRecorder,
    ) -> EngineRun {
        self.events.publish(Event::RevocationStarted {
            candidates: candidates.len(),
            dry_run,
        });
        info!(candidates = candidates.len(), dry_run, "revocation started");

        let total = candidates.len();
        let mut run = EngineRun::default();
        let mut pending = pin!(
            stream::iter(candidates.into_iter().enumerate())
                .take_while(|_| ready(!self.cancel.is_cancelled()))
                .map(|(index, candidate)| {
                    let sequence = u64::try_from(index).unwrap_or(u64::MAX);
                    self.resolve(sequence, candidate, dry_run)
                })
                .buffered(self.workers)
        );

        while let Some(resolved) = pending.next().await {
            let outcome = resolved.outcome;
            self.metrics.inc_outcome(outcome.result.as_str());
            self.events.publish(Event::OutcomeRecorded {
                sequence: outcome.sequence,
                file_id: outcome.candidate.file_id.to_string(),
                permission_id: outcome.candidate.permission_id.to_string(),
                result: outcome.result.as_str().to_string(),
            });
            if let Err(err) = recorder
                .append(&AuditRecord::Outcome {
                    run_id,
                    outcome: outcome.clone(),
                })
                .await
            {
                self.metrics.inc_audit_failure();
                warn!(error = %err, sequence = outcome.sequence, "failed to append audit record");
            }
            if let Some(grant) = resolved.revoked {
                run.revoked.push(grant);
            }
            run.outcomes.push(outcome);
        }

        run.cancelled = run.outcomes.len() < total;
        run.summary = RunSummary::from_outcomes(&run.outcomes);
        if run.cancelled {
            warn!(
                processed = run.outcomes.len(),
                total, "revocation cancelled before all candidates were processed"
            );
        }
        run
    }

    async fn resolve(&self, sequence: u64, candidate: CandidateDecision, dry_run: bool) -> Resolved {
        let reference = candidate.reference();
        let skip = |reason| Resolved {
            outcome: Outcome::skipped(sequence, reference.clone(), reason, 0, self.clock.now()),
            revoked: None,
        };

        match candidate.classification {
            Classification::Protected => return skip(SkipReason::OwnerProtected),
            Classification::Absent => return skip(SkipReason::AlreadyAbsent),
            Classification::Revocable => {}
        }
        if candidate.permission.role == Role::Owner {
            error!(
                file_id = %reference.file_id,
                permission_id = %reference.permission_id,
                "ownership grant reached the attempt site; refusing"
            );
            return skip(SkipReason::OwnerProtected);
        }
        if dry_run {
            return Resolved {
                outcome: Outcome::simulated(sequence, reference, self.clock.now()),
                revoked: None,
            };
        }

        let file_id = &candidate.permission.file_id;
        let permission_id = &candidate.permission.id;
        let attempted = self
            .retrier
            .run(
                || {
                    self.metrics.inc_delete_attempt();
                    self.source.delete_permission(file_id, permission_id)
                },
                |attempt, delay| {
                    self.metrics.inc_retry();
                    self.events.publish(Event::RetryScheduled {
                        file_id: file_id.to_string(),
                        permission_id: permission_id.to_string(),
                        attempt,
                        delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    });
                },
            )
            .await;
        let attempts = attempted.attempts;

        match attempted.result {
            Ok(()) => {
                let now = self.clock.now();
                debug!(%file_id, %permission_id, attempts, "grant removed");
                Resolved {
                    outcome: Outcome::success(sequence, reference, attempts, now),
                    revoked: Some(RevokedGrant {
                        permission: candidate.permission,
                        revoked_at: now,
                    }),
                }
            }
            Err(err @ SourceError::NotFound { .. }) => {
                if self.still_granted(&candidate).await {
                    warn!(%file_id, %permission_id, "delete reported not found but grant is still listed");
                    Resolved {
                        outcome: Outcome::failed(
                            sequence,
                            reference,
                            err.describe(),
                            attempts,
                            self.clock.now(),
                        ),
                        revoked: None,
                    }
                } else {
                    let now = self.clock.now();
                    info!(%file_id, %permission_id, "grant vanished before removal");
                    Resolved {
                        outcome: Outcome::skipped(
                            sequence,
                            reference,
                            SkipReason::Vanished,
                            attempts,
                            now,
                        ),
                        revoked: Some(RevokedGrant {
                            permission: candidate.permission,
                            revoked_at: now,
                        }),
                    }
                }
            }
            Err(err) => {
                warn!(
                    %file_id,
                    %permission_id,
                    attempts,
                    error = %err.describe(),
                    "grant removal failed"
                );
                Resolved {
                    outcome: Outcome::failed(
                        sequence,
                        reference,
                        err.describe(),
                        attempts,
                        self.clock.now(),
                    ),
                    revoked: None,
                }
            }
        }
    }

    /// Re-read the file's permissions after a `NotFound` delete.
    ///
    /// A vanished file counts as gone. Any other read failure keeps the grant
    /// counted as present so the outcome is reported as a failure.
    async fn still_granted(&self, candidate: &CandidateDecision) -> bool {
        match self
            .source
            .list_permissions(&candidate.permission.file_id)
            .await
        {
            Ok(permissions) => permissions
                .iter()
                .any(|permission| permission.id == candidate.permission.id),
            Err(SourceError::NotFound { .. }) => false,
            Err(err) => {
                warn!(
                    file_id = %candidate.permission.file_id,
                    error = %err.describe(),
                    "re-verification failed"
                );
                true
            }
        }
    }
}
