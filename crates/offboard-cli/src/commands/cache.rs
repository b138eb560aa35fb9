use offboard_cache::{CacheKey, SnapshotCache};
use serde_json::json;

use crate::cli::{CacheClearArgs, OutputFormat};
use crate::client::{AppContext, CliError, CliResult};
use crate::commands::open_cache;
use crate::output::render_cache_entries;

pub(crate) async fn handle_cache_info(ctx: &AppContext) -> CliResult<()> {
    let entries = open_cache(&ctx.config)
        .entries()
        .await
        .map_err(CliError::failure)?;
    render_cache_entries(&entries, ctx.output)
}

pub(crate) async fn handle_cache_clear(ctx: &AppContext, args: CacheClearArgs) -> CliResult<()> {
    let cache = open_cache(&ctx.config);
    let removed = match &args.scope {
        Some(scope) => {
            let removed = cache
                .invalidate(&CacheKey::for_scope(scope))
                .await
                .map_err(CliError::failure)?;
            usize::from(removed)
        }
        None => cache.clear().await.map_err(CliError::failure)?,
    };
    report_removed(ctx.output, "cleared", removed);
    Ok(())
}

pub(crate) async fn handle_cache_purge(ctx: &AppContext) -> CliResult<()> {
    let removed = open_cache(&ctx.config)
        .purge_expired()
        .await
        .map_err(CliError::failure)?;
    report_removed(ctx.output, "purged", removed);
    Ok(())
}

fn report_removed(format: OutputFormat, action: &str, removed: usize) {
    match format {
        OutputFormat::Json => println!("{}", json!({ "action": action, "removed": removed })),
        OutputFormat::Table => {
            let noun = if removed == 1 { "entry" } else { "entries" };
            println!("{action} {removed} cache {noun}");
        }
    }
}
