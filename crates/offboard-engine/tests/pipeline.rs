use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use offboard_cache::{CacheKey, MemorySnapshotCache, SnapshotCache};
use offboard_config::{RetryPolicy, RunConfig, RunMode};
use offboard_core::{
    Classification, FileRecord, GranteeType, OutcomeResult, Role, SkipReason, Snapshot,
    SourceError,
};
use offboard_engine::{
    AuditRecord, AuditRecorder, AutoConfirm, CancellationFlag, Confirmation,
    ConfirmationRequest, EngineError, EngineResult, InventoryOrigin, MemoryAuditRecorder,
    RevocationPipeline,
};
use offboard_events::EventBus;
use offboard_telemetry::Metrics;
use offboard_test_support::{ManualClock, RecordingSleeper, ScriptedFileSource, SourceCall, fixtures};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const ALICE: &str = "alice@example.com";
const BOB: &str = "bob@example.com";

struct Harness {
    source: Arc<ScriptedFileSource>,
    clock: Arc<ManualClock>,
    sleeper: Arc<RecordingSleeper>,
    recorder: Arc<MemoryAuditRecorder>,
    metrics: Metrics,
    pipeline: RevocationPipeline,
}

fn harness(files: Vec<FileRecord>) -> anyhow::Result<Harness> {
    harness_with(ScriptedFileSource::new(files), |pipeline| pipeline)
}

fn harness_with(
    source: ScriptedFileSource,
    customise: impl FnOnce(RevocationPipeline) -> RevocationPipeline,
) -> anyhow::Result<Harness> {
    let source = Arc::new(source);
    let clock = Arc::new(ManualClock::new(fixtures::epoch()));
    let sleeper = Arc::new(RecordingSleeper::new());
    let recorder = Arc::new(MemoryAuditRecorder::new());
    let metrics = Metrics::new()?;
    let pipeline = RevocationPipeline::new(source.clone(), EventBus::new(), metrics.clone())
        .with_cache(Arc::new(MemorySnapshotCache::new(clock.clone())))
        .with_recorder(recorder.clone())
        .with_confirmation(Arc::new(AutoConfirm))
        .with_clock(clock.clone())
        .with_sleeper(sleeper.clone());
    Ok(Harness {
        source,
        clock,
        sleeper,
        recorder,
        metrics,
        pipeline: customise(pipeline),
    })
}

fn config(mode: RunMode) -> RunConfig {
    RunConfig {
        principal: ALICE.to_string(),
        mode,
        scope: "me".to_string(),
        cache_ttl: Duration::from_secs(3_600),
        use_cache: true,
        allow_stale: false,
        force_refresh: false,
        fetch_concurrency: 4,
        workers: 3,
        retry: RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 1_000,
            jitter: false,
        },
    }
}

fn results(outcomes: &[offboard_core::Outcome]) -> Vec<OutcomeResult> {
    outcomes.iter().map(|outcome| outcome.result).collect()
}

#[tokio::test]
async fn partial_failure_is_isolated_and_summarised() -> anyhow::Result<()> {
    let h = harness(vec![
        fixtures::shared_file("a", &[ALICE]),
        fixtures::shared_file("b", &[ALICE]),
        fixtures::shared_file("c", &[ALICE]),
    ])?;
    h.source.script_delete(
        "b",
        "b-r0",
        vec![SourceError::PermissionDenied {
            operation: "delete_permission",
            reason: Some("insufficientFilePermissions".into()),
        }],
    );

    let report = h.pipeline.run(&config(RunMode::Revoke)).await?;

    assert_eq!(
        results(&report.outcomes),
        vec![OutcomeResult::Success, OutcomeResult::Failed, OutcomeResult::Success]
    );
    assert_eq!(report.outcomes[1].attempts, 1);
    assert!(
        report.outcomes[1]
            .error
            .as_deref()
            .is_some_and(|error| error.contains("permission_denied"))
    );
    assert_eq!(
        (report.summary.total, report.summary.success, report.summary.failed),
        (3, 2, 1)
    );
    assert!(report.summary.is_consistent());
    assert!(report.has_failures());
    Ok(())
}

#[tokio::test]
async fn rate_limited_twice_then_succeeds_on_third_call() -> anyhow::Result<()> {
    let h = harness(vec![fixtures::shared_file("a", &[ALICE])])?;
    let limited = || SourceError::RateLimited {
        operation: "delete_permission",
        retry_after: None,
    };
    h.source.script_delete("a", "a-r0", vec![limited(), limited()]);

    let report = h.pipeline.run(&config(RunMode::Revoke)).await?;

    assert_eq!(results(&report.outcomes), vec![OutcomeResult::Success]);
    assert_eq!(report.outcomes[0].attempts, 3);
    assert_eq!(h.source.delete_calls_for("a", "a-r0"), 3);
    assert_eq!(
        h.sleeper.sleeps(),
        vec![Duration::from_millis(100), Duration::from_millis(200)]
    );
    let metrics = h.metrics.snapshot();
    assert_eq!(metrics.delete_attempts, 3);
    assert_eq!(metrics.retries, 2);
    Ok(())
}

#[tokio::test]
async fn exhausted_retries_fail_with_last_error() -> anyhow::Result<()> {
    let h = harness(vec![fixtures::shared_file("a", &[ALICE])])?;
    h.source.script_delete(
        "a",
        "a-r0",
        (0..5)
            .map(|_| SourceError::Timeout {
                operation: "delete_permission",
            })
            .collect(),
    );

    let report = h.pipeline.run(&config(RunMode::Revoke)).await?;

    assert_eq!(results(&report.outcomes), vec![OutcomeResult::Failed]);
    assert_eq!(report.outcomes[0].attempts, 5);
    assert_eq!(
        report.outcomes[0].error.as_deref(),
        Some("timeout: delete_permission")
    );
    Ok(())
}

#[tokio::test]
async fn dry_run_simulates_without_deleting() -> anyhow::Result<()> {
    let files = (0..5)
        .map(|index| fixtures::shared_file(&format!("f{index}"), &[ALICE, BOB]))
        .collect();
    let h = harness(files)?;

    let report = h.pipeline.run(&config(RunMode::DryRun)).await?;

    assert_eq!(report.summary.total, 5);
    assert_eq!(report.summary.success, 5);
    assert_eq!(report.summary.simulated, 5);
    assert!(report.outcomes.iter().all(|outcome| outcome.simulated));
    assert_eq!(h.source.delete_calls(), 0);
    assert!(h.source.files().iter().all(|file| file.permissions.len() == 3));
    Ok(())
}

#[tokio::test]
async fn second_live_run_finds_everything_absent() -> anyhow::Result<()> {
    let h = harness(vec![
        fixtures::shared_file("a", &[ALICE, BOB]),
        fixtures::shared_file("b", &[ALICE]),
        fixtures::file(
            "c",
            vec![fixtures::user_permission("c", "c-w", Role::Writer, ALICE)],
        ),
    ])?;

    let first = h.pipeline.run(&config(RunMode::Revoke)).await?;
    assert_eq!(first.summary.success, 3);
    let deletes_after_first = h.source.delete_calls();

    let second = h.pipeline.run(&config(RunMode::Revoke)).await?;

    assert_eq!(second.origin, InventoryOrigin::Cache);
    assert_eq!(second.summary.total, 3);
    assert!(
        second
            .candidates
            .iter()
            .all(|candidate| candidate.classification == Classification::Absent)
    );
    assert!(second.outcomes.iter().all(|outcome| {
        outcome.result == OutcomeResult::Skipped
            && outcome.skip_reason == Some(SkipReason::AlreadyAbsent)
    }));
    assert_eq!(h.source.delete_calls(), deletes_after_first);
    assert_eq!(
        second
            .candidates
            .iter()
            .map(|candidate| candidate.permission_id.to_string())
            .collect::<Vec<_>>(),
        first
            .candidates
            .iter()
            .map(|candidate| candidate.permission_id.to_string())
            .collect::<Vec<_>>()
    );
    Ok(())
}

#[tokio::test]
async fn owner_grants_are_never_attempted_over_random_inventories() -> anyhow::Result<()> {
    let roles = [Role::Owner, Role::Writer, Role::Commenter, Role::Reader];
    let types = [GranteeType::User, GranteeType::Group, GranteeType::Domain, GranteeType::Anyone];

    for seed in 0..40_u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let files: Vec<FileRecord> = (0..rng.random_range(1..8))
            .map(|index| {
                let id = format!("s{seed}-f{index}");
                let extra = (0..rng.random_range(0..6))
                    .map(|grant| {
                        let grantee_type = types[rng.random_range(0..types.len())];
                        let grantee = match grantee_type {
                            GranteeType::Domain => Some("example.com"),
                            GranteeType::Anyone => None,
                            _ if rng.random_bool(0.7) => Some(ALICE),
                            _ => Some(BOB),
                        };
                        fixtures::grant(
                            &id,
                            &format!("{id}-g{grant}"),
                            roles[rng.random_range(0..roles.len())],
                            grantee_type,
                            grantee,
                        )
                    })
                    .collect();
                fixtures::file(&id, extra)
            })
            .collect();
        let owner_grants: Vec<(String, String)> = files
            .iter()
            .flat_map(|file| file.permissions.iter())
            .filter(|permission| permission.role == Role::Owner)
            .map(|permission| (permission.file_id.to_string(), permission.id.to_string()))
            .collect();
        let h = harness(files)?;

        let report = h.pipeline.run(&config(RunMode::Revoke)).await?;

        assert!(report.summary.is_consistent(), "seed {seed}");
        assert_eq!(report.summary.total, report.candidates.len(), "seed {seed}");
        for call in h.source.calls() {
            if let SourceCall::DeletePermission(file, permission) = call {
                assert!(
                    !owner_grants.contains(&(file.to_string(), permission.to_string())),
                    "seed {seed}: owner grant {permission} was attempted"
                );
            }
        }
        for outcome in report
            .outcomes
            .iter()
            .filter(|outcome| outcome.candidate.role == Role::Owner)
        {
            assert_eq!(outcome.result, OutcomeResult::Skipped, "seed {seed}");
            assert_eq!(outcome.attempts, 0, "seed {seed}");
            assert_eq!(outcome.skip_reason, Some(SkipReason::OwnerProtected));
        }
    }
    Ok(())
}

#[tokio::test]
async fn fresh_cache_serves_until_ttl_then_rescans() -> anyhow::Result<()> {
    let h = harness(vec![fixtures::shared_file("a", &[ALICE])])?;
    let run = config(RunMode::AuditOnly);

    let first = h.pipeline.run(&run).await?;
    assert_eq!(first.origin, InventoryOrigin::Remote);
    assert_eq!(h.source.listing_calls(), 1);

    h.clock.advance(Duration::from_secs(3_599));
    let second = h.pipeline.run(&run).await?;
    assert_eq!(second.origin, InventoryOrigin::Cache);
    assert_eq!(second.snapshot_age_secs, 3_599);
    assert_eq!(h.source.listing_calls(), 1);

    h.clock.advance(Duration::from_secs(2));
    let third = h.pipeline.run(&run).await?;
    assert_eq!(third.origin, InventoryOrigin::Remote);
    assert_eq!(h.source.listing_calls(), 2);

    let refreshed = h
        .pipeline
        .run(&RunConfig {
            force_refresh: true,
            ..run
        })
        .await?;
    assert_eq!(refreshed.origin, InventoryOrigin::Remote);
    assert_eq!(h.source.listing_calls(), 3);

    let metrics = h.metrics.snapshot();
    assert_eq!(metrics.cache_hits, 1);
    assert_eq!(metrics.cache_misses, 2);
    Ok(())
}

#[tokio::test]
async fn unreachable_source_without_snapshot_aborts() -> anyhow::Result<()> {
    let h = harness(vec![fixtures::shared_file("a", &[ALICE])])?;
    h.source.set_unavailable(true);

    let err = h
        .pipeline
        .run(&config(RunMode::Revoke))
        .await
        .expect_err("no inventory available");

    assert!(matches!(
        err,
        EngineError::SourceUnavailable {
            stale_available: false,
            ..
        }
    ));
    assert_eq!(h.source.delete_calls(), 0);
    assert!(
        h.recorder
            .records()
            .iter()
            .any(|record| matches!(record, AuditRecord::RunAborted { .. }))
    );
    Ok(())
}

#[tokio::test]
async fn expired_snapshot_is_used_only_when_stale_is_allowed() -> anyhow::Result<()> {
    let h = harness(vec![fixtures::shared_file("a", &[ALICE])])?;
    h.pipeline.run(&config(RunMode::AuditOnly)).await?;
    h.clock.advance(Duration::from_secs(7_200));
    h.source.set_unavailable(true);

    let err = h
        .pipeline
        .run(&config(RunMode::AuditOnly))
        .await
        .expect_err("stale snapshot must not be used silently");
    assert!(matches!(
        err,
        EngineError::SourceUnavailable {
            stale_available: true,
            ..
        }
    ));

    let report = h
        .pipeline
        .run(&RunConfig {
            allow_stale: true,
            ..config(RunMode::AuditOnly)
        })
        .await?;
    assert_eq!(report.origin, InventoryOrigin::StaleCache);
    assert_eq!(report.snapshot_age_secs, 7_200);
    assert_eq!(report.access.revocable, 1);
    Ok(())
}

#[tokio::test]
async fn not_found_is_reverified_before_classifying() -> anyhow::Result<()> {
    let h = harness(vec![
        fixtures::shared_file("a", &[ALICE]),
        fixtures::shared_file("b", &[ALICE]),
    ])?;
    h.pipeline.run(&config(RunMode::AuditOnly)).await?;
    h.source.remove_permission("a", "a-r0");
    h.source.script_delete(
        "b",
        "b-r0",
        vec![SourceError::NotFound {
            operation: "delete_permission",
        }],
    );

    let report = h.pipeline.run(&config(RunMode::Revoke)).await?;

    assert_eq!(report.outcomes[0].result, OutcomeResult::Skipped);
    assert_eq!(report.outcomes[0].skip_reason, Some(SkipReason::Vanished));
    assert_eq!(report.outcomes[1].result, OutcomeResult::Failed);
    assert!(
        h.source
            .calls()
            .contains(&SourceCall::ListPermissions("a".into()))
    );

    let next = h.pipeline.run(&config(RunMode::AuditOnly)).await?;
    assert_eq!(next.access.absent, 1);
    assert_eq!(next.access.revocable, 1);
    Ok(())
}

#[tokio::test]
async fn outcomes_follow_file_order_despite_latency() -> anyhow::Result<()> {
    let source = ScriptedFileSource::new(vec![
        fixtures::shared_file("e", &[ALICE]),
        fixtures::shared_file("d", &[ALICE]),
        fixtures::shared_file("c", &[ALICE]),
        fixtures::shared_file("b", &[ALICE]),
        fixtures::shared_file("a", &[ALICE]),
    ])
    .with_page_size(2)
    .without_embedded_permissions()
    .with_permission_latency("e", Duration::from_millis(40))
    .with_permission_latency("c", Duration::from_millis(20));
    let h = harness_with(source, |pipeline| pipeline)?;

    let report = h.pipeline.run(&config(RunMode::Revoke)).await?;

    assert_eq!(h.source.listing_calls(), 3);
    let order: Vec<String> = report
        .outcomes
        .iter()
        .map(|outcome| outcome.candidate.file_id.to_string())
        .collect();
    assert_eq!(order, vec!["a", "b", "c", "d", "e"]);
    let sequences: Vec<u64> = report.outcomes.iter().map(|outcome| outcome.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
    assert_eq!(h.recorder.outcomes(), report.outcomes);
    Ok(())
}

#[tokio::test]
async fn audit_only_reports_access_without_outcomes() -> anyhow::Result<()> {
    let h = harness(vec![
        fixtures::owned_file("a", ALICE),
        fixtures::shared_file("b", &[ALICE]),
        fixtures::shared_file("c", &[BOB]),
    ])?;

    let report = h.pipeline.run(&config(RunMode::AuditOnly)).await?;

    assert!(report.outcomes.is_empty());
    assert!(!report.confirmed);
    assert_eq!(report.candidates.len(), 2);
    assert_eq!(report.access.owned_files, 1);
    assert_eq!(report.access.files_with_access, 2);
    assert_eq!(h.source.delete_calls(), 0);
    let records = h.recorder.records();
    assert!(matches!(records.first(), Some(AuditRecord::RunStarted { .. })));
    assert!(matches!(
        records.last(),
        Some(AuditRecord::RunFinished {
            cancelled: false,
            ..
        })
    ));
    Ok(())
}

#[tokio::test]
async fn declined_checkpoint_makes_no_destructive_calls() -> anyhow::Result<()> {
    let h = harness_with(
        ScriptedFileSource::new(vec![fixtures::shared_file("a", &[ALICE])]),
        |pipeline| pipeline.with_confirmation(Arc::new(offboard_engine::NeverConfirm)),
    )?;

    let report = h.pipeline.run(&config(RunMode::Revoke)).await?;

    assert!(!report.confirmed);
    assert!(report.outcomes.is_empty());
    assert_eq!(report.access.revocable, 1);
    assert_eq!(h.source.delete_calls(), 0);
    assert!(
        h.pipeline
            .events()
            .recent()
            .iter()
            .any(|envelope| envelope.event.kind() == "awaiting_confirmation")
    );
    Ok(())
}

#[tokio::test]
async fn invalid_principal_fails_before_scanning() -> anyhow::Result<()> {
    let h = harness(vec![fixtures::shared_file("a", &[ALICE])])?;

    let err = h
        .pipeline
        .run(&RunConfig {
            principal: "not-an-address".into(),
            ..config(RunMode::Revoke)
        })
        .await
        .expect_err("principal rejected");

    assert!(matches!(err, EngineError::InvalidPrincipal { .. }));
    assert!(h.source.calls().is_empty());
    assert!(h.recorder.records().is_empty());
    Ok(())
}

struct CancelAfterFirstOutcome {
    flag: CancellationFlag,
    inner: MemoryAuditRecorder,
}

#[async_trait]
impl AuditRecorder for CancelAfterFirstOutcome {
    async fn append(&self, record: &AuditRecord) -> EngineResult<()> {
        if matches!(record, AuditRecord::Outcome { .. }) {
            self.flag.cancel();
        }
        self.inner.append(record).await
    }
}

#[tokio::test]
async fn cancellation_reports_partial_summary() -> anyhow::Result<()> {
    let h = harness(vec![
        fixtures::shared_file("a", &[ALICE]),
        fixtures::shared_file("b", &[ALICE]),
        fixtures::shared_file("c", &[ALICE]),
    ])?;
    let recorder = Arc::new(CancelAfterFirstOutcome {
        flag: h.pipeline.cancellation().clone(),
        inner: MemoryAuditRecorder::new(),
    });
    let pipeline = h.pipeline.with_recorder(recorder.clone());

    let report = pipeline
        .run(&RunConfig {
            workers: 1,
            ..config(RunMode::Revoke)
        })
        .await?;

    assert!(report.cancelled);
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.summary.total, 1);
    assert!(report.summary.is_consistent());
    assert_eq!(h.source.delete_calls(), 1);
    assert!(
        pipeline
            .events()
            .recent()
            .iter()
            .any(|envelope| envelope.event.kind() == "run_cancelled")
    );
    assert!(matches!(
        recorder.inner.records().last(),
        Some(AuditRecord::RunFinished {
            cancelled: true,
            ..
        })
    ));
    Ok(())
}

/// Writes a newer snapshot for the scope while the run waits at the
/// checkpoint, as a concurrent refresh would.
struct RefreshDuringCheckpoint {
    cache: Arc<MemorySnapshotCache>,
    newer: Snapshot,
}

#[async_trait]
impl Confirmation for RefreshDuringCheckpoint {
    async fn confirm(&self, _request: &ConfirmationRequest) -> bool {
        self.cache
            .put(
                &CacheKey::for_scope("me"),
                &self.newer,
                Duration::from_secs(3_600),
            )
            .await
            .is_ok()
    }
}

#[tokio::test]
async fn ledger_write_back_never_replaces_a_newer_snapshot() -> anyhow::Result<()> {
    let clock = Arc::new(ManualClock::new(fixtures::epoch()));
    let cache = Arc::new(MemorySnapshotCache::new(clock.clone()));
    let newer = fixtures::snapshot(
        "me",
        fixtures::epoch() + chrono::Duration::seconds(60),
        vec![
            fixtures::shared_file("a", &[ALICE]),
            fixtures::shared_file("z", &[BOB]),
        ],
    );
    let h = harness_with(
        ScriptedFileSource::new(vec![fixtures::shared_file("a", &[ALICE])]),
        |pipeline| {
            pipeline
                .with_cache(cache.clone())
                .with_clock(clock.clone())
                .with_confirmation(Arc::new(RefreshDuringCheckpoint {
                    cache: cache.clone(),
                    newer: newer.clone(),
                }))
        },
    )?;

    let report = h.pipeline.run(&config(RunMode::Revoke)).await?;

    assert_eq!(report.summary.success, 1);
    assert_eq!(cache.get(&CacheKey::for_scope("me")).await, Some(newer));
    Ok(())
}

#[tokio::test]
async fn unreadable_file_does_not_abort_the_run_or_cache_a_partial_ledger() -> anyhow::Result<()> {
    let source = ScriptedFileSource::new(vec![
        fixtures::shared_file("a", &[ALICE]),
        fixtures::shared_file("b", &[ALICE]),
    ])
    .without_embedded_permissions();
    source.script_permission_listing(
        "b",
        vec![SourceError::PermissionDenied {
            operation: "list_permissions",
            reason: Some("insufficientFilePermissions".into()),
        }],
    );
    let clock = Arc::new(ManualClock::new(fixtures::epoch()));
    let cache = Arc::new(MemorySnapshotCache::new(clock.clone()));
    let h = harness_with(source, |pipeline| {
        pipeline.with_cache(cache.clone()).with_clock(clock.clone())
    })?;

    let report = h.pipeline.run(&config(RunMode::Revoke)).await?;

    assert_eq!(report.summary.total, 1);
    assert_eq!(report.summary.success, 1);
    let unreadable: Vec<&str> = report
        .unreadable_files
        .iter()
        .map(|id| id.as_str())
        .collect();
    assert_eq!(unreadable, vec!["b"]);
    assert!(cache.entries().await?.is_empty());
    assert_eq!(h.metrics.snapshot().unreadable_files, 1);
    Ok(())
}
