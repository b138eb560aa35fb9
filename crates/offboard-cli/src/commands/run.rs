use std::io::{self, IsTerminal};
use std::sync::Arc;
use std::time::Duration;

use offboard_engine::{JsonLinesAuditRecorder, RevocationPipeline};
use offboard_events::{Event, EventBus, EventStream};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::client::{AppContext, CliError, CliResult};
use crate::commands::open_cache;
use crate::output::{render_run_report, write_report};
use crate::prompt::confirmation_for;
use crate::source::HttpFileSource;

pub(crate) async fn handle_run(ctx: &AppContext, args: RunArgs) -> CliResult<()> {
    let run_config = args.run_config(&ctx.config)?;
    let token = args
        .access_token
        .as_deref()
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            CliError::validation(
                "an access token is required (pass --access-token or set OFFBOARD_ACCESS_TOKEN)",
            )
        })?;
    let confirmation = confirmation_for(run_config.mode, args.yes)?;

    let source = HttpFileSource::new(
        &ctx.config.scan.base_url,
        token,
        ctx.config.scan.page_size,
        Duration::from_secs(ctx.config.scan.request_timeout_secs),
    )?
    .with_admin_access(args.admin_access || ctx.config.scan.admin_access);
    let mut pipeline = RevocationPipeline::new(
        Arc::new(source),
        EventBus::new(),
        ctx.metrics.clone(),
    )
    .with_recorder(Arc::new(JsonLinesAuditRecorder::new(
        &ctx.config.audit.log_path,
    )))
    .with_confirmation(confirmation);
    if run_config.use_cache {
        pipeline = pipeline.with_cache(Arc::new(open_cache(&ctx.config)));
    }

    let progress = io::stderr()
        .is_terminal()
        .then(|| spawn_progress(pipeline.events().subscribe(None)));
    let cancel = pipeline.cancellation().clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing in-flight revocations");
            cancel.cancel();
        }
    });

    let result = pipeline.run(&run_config).await;
    interrupt.abort();
    if let Some(progress) = progress {
        progress.abort();
    }
    let report = result?;

    render_run_report(&report, ctx.output)?;
    if let Some(path) = &args.report {
        write_report(path, &report)?;
        info!(path = %path.display(), "run report written");
    }

    if report.has_failures() {
        return Err(CliError::Partial {
            failed: report.summary.failed,
        });
    }
    Ok(())
}

/// Print short progress lines to stderr while the run is in flight.
fn spawn_progress(mut events: EventStream) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(envelope) = events.next().await {
            match envelope.event {
                Event::PageFetched { page, files } => {
                    eprintln!("scanned page {page} ({files} files)");
                }
                Event::CacheHit { age_secs, .. } => {
                    eprintln!("using cached inventory ({age_secs}s old)");
                }
                Event::RetryScheduled {
                    file_id,
                    permission_id,
                    attempt,
                    delay_ms,
                } => {
                    eprintln!("retrying {file_id}/{permission_id} after attempt {attempt} in {delay_ms}ms");
                }
                Event::OutcomeRecorded {
                    sequence,
                    file_id,
                    result,
                    ..
                } => {
                    eprintln!("[{sequence}] {file_id}: {result}");
                }
                _ => {}
            }
        }
    })
}
