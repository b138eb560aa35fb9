//! Output renderers and formatting helpers for CLI commands.

use std::fs;
use std::path::Path;

use anyhow::anyhow;
use offboard_cache::CacheEntryInfo;
use offboard_config::RunMode;
use offboard_core::{Outcome, OutcomeResult};
use offboard_engine::RunReport;
use serde::Serialize;

use crate::cli::OutputFormat;
use crate::client::{CliError, CliResult};

fn to_json<T: Serialize + ?Sized>(value: &T) -> CliResult<String> {
    serde_json::to_string_pretty(value)
        .map_err(|err| CliError::failure(anyhow!("failed to format JSON: {err}")))
}

pub(crate) fn render_run_report(report: &RunReport, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => println!("{}", to_json(report)?),
        OutputFormat::Table => {
            println!("run: {}", report.run_id);
            println!("principal: {}", report.principal);
            println!("mode: {}", report.mode);
            println!(
                "inventory: {} (captured {}, {} old)",
                report.origin.as_str(),
                report.snapshot_captured_at.format("%Y-%m-%d %H:%M:%S UTC"),
                format_age(report.snapshot_age_secs)
            );
            if !report.unreadable_files.is_empty() {
                let ids = report
                    .unreadable_files
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                println!(
                    "warning: {} file(s) left out, sharing list unreadable: {ids}",
                    report.unreadable_files.len()
                );
            }

            let access = &report.access;
            println!(
                "access: {} of {} file(s) shared, {} owned, {} via domain",
                access.files_with_access,
                access.files_scanned,
                access.owned_files,
                access.via_domain
            );
            if !access.by_role.is_empty() {
                let roles = access
                    .by_role
                    .iter()
                    .map(|(role, count)| format!("{role}={count}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                println!("roles: {roles}");
            }
            println!(
                "candidates: {} revocable, {} protected, {} absent",
                access.revocable, access.protected, access.absent
            );

            if report.mode == RunMode::AuditOnly {
                render_candidate_table(report);
            } else if !report.outcomes.is_empty() {
                render_outcome_table(&report.outcomes);
            }

            if report.mode.is_destructive() && !report.confirmed {
                println!("revocation declined; nothing was changed");
                return Ok(());
            }
            if report.mode != RunMode::AuditOnly {
                let summary = &report.summary;
                let simulated = if summary.simulated > 0 {
                    format!(" ({} simulated)", summary.simulated)
                } else {
                    String::new()
                };
                println!(
                    "summary: total {}, success {}{simulated}, failed {}, skipped {}",
                    summary.total, summary.success, summary.failed, summary.skipped
                );
            }
            if report.cancelled {
                println!("run cancelled; summary covers processed candidates only");
            }
        }
    }
    Ok(())
}

fn render_candidate_table(report: &RunReport) {
    if report.candidates.is_empty() {
        println!("no grants found for {}", report.principal);
        return;
    }
    println!(
        "{:<28} {:<10} {:<10} {:<10} NAME",
        "FILE", "PERMISSION", "ROLE", "CLASS"
    );
    for candidate in &report.candidates {
        println!(
            "{:<28} {:<10} {:<10} {:<10} {}",
            candidate.file_id,
            candidate.permission_id,
            candidate.role,
            candidate.classification.as_str(),
            candidate.file_name
        );
    }
}

fn render_outcome_table(outcomes: &[Outcome]) {
    println!(
        "{:>4} {:<9} {:<28} {:<10} {:>3} DETAIL",
        "SEQ", "RESULT", "FILE", "PERMISSION", "TRY"
    );
    for outcome in outcomes {
        println!(
            "{:>4} {:<9} {:<28} {:<10} {:>3} {}",
            outcome.sequence,
            outcome.result.as_str(),
            outcome.candidate.file_id,
            outcome.candidate.permission_id,
            outcome.attempts,
            outcome_detail(outcome)
        );
    }
}

fn outcome_detail(outcome: &Outcome) -> String {
    match outcome.result {
        OutcomeResult::Success if outcome.simulated => "simulated".to_string(),
        OutcomeResult::Success => String::new(),
        OutcomeResult::Failed => outcome.error.clone().unwrap_or_default(),
        OutcomeResult::Skipped => outcome
            .skip_reason
            .map(|reason| reason.as_str().to_string())
            .unwrap_or_default(),
    }
}

pub(crate) fn render_cache_entries(
    entries: &[CacheEntryInfo],
    format: OutputFormat,
) -> CliResult<()> {
    match format {
        OutputFormat::Json => println!("{}", to_json(entries)?),
        OutputFormat::Table => {
            if entries.is_empty() {
                println!("cache is empty");
                return Ok(());
            }
            println!(
                "{:<16} {:<24} {:<20} {:<20} {:>6} {:>10} STATE",
                "KEY", "SCOPE", "CREATED", "EXPIRES", "FILES", "SIZE"
            );
            for entry in entries {
                let state = match (entry.valid, entry.expired) {
                    (false, _) => "invalid",
                    (true, true) => "expired",
                    (true, false) => "valid",
                };
                println!(
                    "{:<16} {:<24} {:<20} {:<20} {:>6} {:>10} {state}",
                    short_key(&entry.key),
                    entry.scope.as_deref().unwrap_or("-"),
                    entry
                        .created_at
                        .map_or_else(|| "-".to_string(), |at| at.format("%Y-%m-%d %H:%M").to_string()),
                    entry
                        .expires_at
                        .map_or_else(|| "-".to_string(), |at| at.format("%Y-%m-%d %H:%M").to_string()),
                    entry
                        .file_count
                        .map_or_else(|| "-".to_string(), |count| count.to_string()),
                    format_bytes(entry.size_bytes),
                );
            }
        }
    }
    Ok(())
}

/// Persist the full report as JSON, creating parent directories.
pub(crate) fn write_report(path: &Path, report: &RunReport) -> CliResult<()> {
    let text = to_json(report)?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|err| {
            CliError::failure(anyhow!("failed to create {}: {err}", parent.display()))
        })?;
    }
    fs::write(path, text)
        .map_err(|err| CliError::failure(anyhow!("failed to write {}: {err}", path.display())))
}

fn short_key(key: &str) -> &str {
    key.get(..16).unwrap_or(key)
}

#[must_use]
pub(crate) fn format_age(secs: u64) -> String {
    match secs {
        0..60 => format!("{secs}s"),
        60..3_600 => format!("{}m", secs / 60),
        3_600..86_400 => format!("{}h{}m", secs / 3_600, (secs % 3_600) / 60),
        _ => format!("{}d{}h", secs / 86_400, (secs % 86_400) / 3_600),
    }
}

#[must_use]
pub(crate) fn format_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = KIB * 1024.0;
    let value = bytes_to_f64(bytes);
    if value >= MIB {
        format!("{:.2} MiB", value / MIB)
    } else if value >= KIB {
        format!("{:.2} KiB", value / KIB)
    } else {
        format!("{bytes} B")
    }
}

fn bytes_to_f64(value: u64) -> f64 {
    let high = u32::try_from(value >> 32).unwrap_or(u32::MAX);
    let low = u32::try_from(value & 0xFFFF_FFFF).unwrap_or(u32::MAX);
    f64::from(high) * 4_294_967_296.0 + f64::from(low)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ages_are_compact() {
        assert_eq!(format_age(5), "5s");
        assert_eq!(format_age(125), "2m");
        assert_eq!(format_age(7_260), "2h1m");
        assert_eq!(format_age(90_000), "1d1h");
    }

    #[test]
    fn sizes_use_binary_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MiB");
    }

    #[test]
    fn short_key_truncates_digests_only() {
        assert_eq!(short_key("0123456789abcdef0123"), "0123456789abcdef");
        assert_eq!(short_key("abc"), "abc");
    }
}
