//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Counters only move forward; one registry per process run.

use std::sync::Arc;
use std::time::Duration;

use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{TelemetryError, TelemetryResult};

/// Prometheus-backed metrics registry shared by the pipeline components.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

struct MetricsInner {
    registry: Registry,
    outcomes_total: IntCounterVec,
    cache_lookups_total: IntCounterVec,
    delete_attempts_total: IntCounter,
    retries_total: IntCounter,
    files_scanned_total: IntCounter,
    pages_fetched_total: IntCounter,
    unreadable_files_total: IntCounter,
    audit_failures_total: IntCounter,
    snapshot_age_seconds: IntGauge,
    run_duration_ms: IntGauge,
}

/// Snapshot of the counters, used by reports and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Successful outcomes.
    pub outcomes_success: u64,
    /// Failed outcomes.
    pub outcomes_failed: u64,
    /// Skipped outcomes.
    pub outcomes_skipped: u64,
    /// Remote delete calls issued.
    pub delete_attempts: u64,
    /// Retries scheduled after transient failures.
    pub retries: u64,
    /// Cache lookups served fresh.
    pub cache_hits: u64,
    /// Cache lookups that missed for any reason.
    pub cache_misses: u64,
    /// Files retrieved from the source.
    pub files_scanned: u64,
    /// Listing pages retrieved from the source.
    pub pages_fetched: u64,
    /// Files left out because their sharing list could not be read.
    pub unreadable_files: u64,
    /// Audit records that could not be appended.
    pub audit_failures: u64,
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> TelemetryResult<()>
where
    C: Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}

fn counter(name: &'static str, help: &str) -> TelemetryResult<IntCounter> {
    IntCounter::with_opts(Opts::new(name, help))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}

fn counter_vec(name: &'static str, help: &str, labels: &[&str]) -> TelemetryResult<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help), labels)
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}

fn gauge(name: &'static str, help: &str) -> TelemetryResult<IntGauge> {
    IntGauge::with_opts(Opts::new(name, help))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// registered.
    pub fn new() -> TelemetryResult<Self> {
        let registry = Registry::new_custom(Some("offboard".to_string()), None)
            .map_err(|source| TelemetryError::MetricsRegister {
                name: "registry",
                source,
            })?;

        let outcomes_total = counter_vec(
            "outcomes_total",
            "Revocation outcomes recorded by result",
            &["result"],
        )?;
        let cache_lookups_total = counter_vec(
            "cache_lookups_total",
            "Snapshot cache lookups by result",
            &["result"],
        )?;
        let delete_attempts_total =
            counter("delete_attempts_total", "Remote permission delete calls")?;
        let retries_total = counter("retries_total", "Retries scheduled after transient failures")?;
        let files_scanned_total = counter("files_scanned_total", "Files retrieved from the source")?;
        let pages_fetched_total = counter("pages_fetched_total", "Listing pages retrieved")?;
        let unreadable_files_total = counter(
            "unreadable_files_total",
            "Files whose sharing list could not be read",
        )?;
        let audit_failures_total =
            counter("audit_failures_total", "Audit records that could not be appended")?;
        let snapshot_age_seconds = gauge(
            "snapshot_age_seconds",
            "Age of the inventory snapshot used by the last run",
        )?;
        let run_duration_ms = gauge("run_duration_ms", "Wall time of the last run (ms)")?;

        register(&registry, "outcomes_total", &outcomes_total)?;
        register(&registry, "cache_lookups_total", &cache_lookups_total)?;
        register(&registry, "delete_attempts_total", &delete_attempts_total)?;
        register(&registry, "retries_total", &retries_total)?;
        register(&registry, "files_scanned_total", &files_scanned_total)?;
        register(&registry, "pages_fetched_total", &pages_fetched_total)?;
        register(&registry, "unreadable_files_total", &unreadable_files_total)?;
        register(&registry, "audit_failures_total", &audit_failures_total)?;
        register(&registry, "snapshot_age_seconds", &snapshot_age_seconds)?;
        register(&registry, "run_duration_ms", &run_duration_ms)?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                outcomes_total,
                cache_lookups_total,
                delete_attempts_total,
                retries_total,
                files_scanned_total,
                pages_fetched_total,
                unreadable_files_total,
                audit_failures_total,
                snapshot_age_seconds,
                run_duration_ms,
            }),
        })
    }

    /// Count one outcome by its result label.
    pub fn inc_outcome(&self, result: &str) {
        self.inner.outcomes_total.with_label_values(&[result]).inc();
    }

    /// Count one cache lookup (`hit`, `miss`, `expired`, `corrupted`, ...).
    pub fn inc_cache_lookup(&self, result: &str) {
        self.inner
            .cache_lookups_total
            .with_label_values(&[result])
            .inc();
    }

    /// Count one remote delete call.
    pub fn inc_delete_attempt(&self) {
        self.inner.delete_attempts_total.inc();
    }

    /// Count one scheduled retry.
    pub fn inc_retry(&self) {
        self.inner.retries_total.inc();
    }

    /// Add files retrieved from one page.
    pub fn add_files_scanned(&self, files: usize) {
        self.inner
            .files_scanned_total
            .inc_by(u64::try_from(files).unwrap_or(u64::MAX));
        self.inner.pages_fetched_total.inc();
    }

    /// Count one file whose permissions could not be listed.
    pub fn inc_unreadable_file(&self) {
        self.inner.unreadable_files_total.inc();
    }

    /// Count one audit append failure.
    pub fn inc_audit_failure(&self) {
        self.inner.audit_failures_total.inc();
    }

    /// Record the age of the snapshot used by a run.
    pub fn set_snapshot_age(&self, age: Duration) {
        self.inner
            .snapshot_age_seconds
            .set(i64::try_from(age.as_secs()).unwrap_or(i64::MAX));
    }

    /// Record the wall time of a run.
    pub fn observe_run_duration(&self, duration: Duration) {
        self.inner
            .run_duration_ms
            .set(Self::duration_to_ms(duration));
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Take a point-in-time snapshot of the counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let outcomes = |label: &str| self.inner.outcomes_total.with_label_values(&[label]).get();
        let lookups =
            |label: &str| self.inner.cache_lookups_total.with_label_values(&[label]).get();
        MetricsSnapshot {
            outcomes_success: outcomes("success"),
            outcomes_failed: outcomes("failed"),
            outcomes_skipped: outcomes("skipped"),
            delete_attempts: self.inner.delete_attempts_total.get(),
            retries: self.inner.retries_total.get(),
            cache_hits: lookups("hit"),
            cache_misses: lookups("miss") + lookups("expired") + lookups("corrupted"),
            files_scanned: self.inner.files_scanned_total.get(),
            pages_fetched: self.inner.pages_fetched_total.get(),
            unreadable_files: self.inner.unreadable_files_total.get(),
            audit_failures: self.inner.audit_failures_total.get(),
        }
    }

    /// Convert a duration to milliseconds saturating at `i64::MAX`.
    pub(crate) fn duration_to_ms(duration: Duration) -> i64 {
        i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
    }
}
