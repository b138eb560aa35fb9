//! Argument parsing, configuration loading, and command dispatch.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use offboard_config::{AppConfig, ConfigLoader, LogStyle, RunConfig, RunMode};
use offboard_telemetry::{LogFormat, LoggingConfig, Metrics, init_logging};

use crate::client::{AppContext, CliError, CliResult};
use crate::commands::cache::{handle_cache_clear, handle_cache_info, handle_cache_purge};
use crate::commands::run::handle_run;

/// Parses CLI arguments, executes the requested command, and writes the
/// metrics file when asked. Returns the process exit code.
pub async fn run() -> i32 {
    let cli = Cli::parse();
    let ctx = match build_context(&cli) {
        Ok(ctx) => ctx,
        Err(err) => {
            eprintln!("error: {}", err.display_message());
            return err.exit_code();
        }
    };

    let result = dispatch(cli.command, &ctx).await;
    if let Err(err) = ctx.flush_metrics() {
        eprintln!("warning: {}", err.display_message());
    }

    match result {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {}", err.display_message());
            err.exit_code()
        }
    }
}

fn build_context(cli: &Cli) -> CliResult<AppContext> {
    let config = load_config(cli.config.as_ref())?;
    let format = match config.logging.format {
        LogStyle::Auto => LogFormat::infer(),
        LogStyle::Pretty => LogFormat::Pretty,
        LogStyle::Json => LogFormat::Json,
    };
    init_logging(&LoggingConfig {
        level: &config.logging.level,
        format,
        build_sha: option_env!("OFFBOARD_BUILD_SHA").unwrap_or("dev"),
    })
    .map_err(CliError::failure)?;

    Ok(AppContext {
        config,
        output: cli.output,
        metrics: Metrics::new().map_err(CliError::failure)?,
        metrics_path: cli.metrics.clone(),
    })
}

fn load_config(path: Option<&PathBuf>) -> CliResult<AppConfig> {
    let loader = ConfigLoader::new().with_process_env();
    let loader = match path {
        Some(path) => loader.with_path(path),
        None => loader,
    };
    Ok(loader.load()?)
}

async fn dispatch(command: Command, ctx: &AppContext) -> CliResult<()> {
    match command {
        Command::Run(args) => handle_run(ctx, args).await,
        Command::Cache(cache) => match cache {
            CacheCommand::Info => handle_cache_info(ctx).await,
            CacheCommand::Clear(args) => handle_cache_clear(ctx, args).await,
            CacheCommand::Purge => handle_cache_purge(ctx).await,
        },
    }
}

#[derive(Parser)]
#[command(
    name = "offboard",
    version,
    about = "Revoke a departing principal's access to shared files"
)]
pub(crate) struct Cli {
    #[arg(long, global = true, env = "OFFBOARD_CONFIG", help = "YAML configuration file")]
    config: Option<PathBuf>,
    #[arg(
        long = "output",
        alias = "format",
        global = true,
        value_enum,
        default_value_t = OutputFormat::Table,
        help = "Select output format for commands that render structured data"
    )]
    output: OutputFormat,
    #[arg(
        long,
        global = true,
        help = "Write Prometheus metrics to this file when the command finishes"
    )]
    metrics: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan, analyse, and (depending on mode) revoke a principal's access.
    Run(RunArgs),
    /// Inspect or clean the snapshot cache.
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Subcommand)]
pub(crate) enum CacheCommand {
    /// List stored snapshots.
    Info,
    /// Remove one scope's snapshot, or every snapshot.
    Clear(CacheClearArgs),
    /// Remove expired snapshots.
    Purge,
}

#[derive(Args, Debug, Clone, Default)]
pub(crate) struct CacheClearArgs {
    #[arg(long, help = "Only clear the snapshot for this scan scope")]
    pub(crate) scope: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub(crate) struct RunArgs {
    #[arg(long, help = "Email address whose access is revoked")]
    pub(crate) principal: String,
    #[arg(long, value_parser = parse_mode, default_value = "audit-only")]
    pub(crate) mode: RunMode,
    #[arg(long, short = 'y', help = "Skip the confirmation prompt in revoke mode")]
    pub(crate) yes: bool,
    #[arg(long, help = "Use an expired snapshot if the file source is unreachable")]
    pub(crate) allow_stale: bool,
    #[arg(long, help = "Ignore any cached snapshot and rescan")]
    pub(crate) refresh: bool,
    #[arg(
        long,
        conflicts_with_all = ["allow_stale", "refresh"],
        help = "Neither read nor write the snapshot cache"
    )]
    pub(crate) no_cache: bool,
    #[arg(
        long,
        help = "Act on permissions as a domain administrator (useDomainAdminAccess)"
    )]
    pub(crate) admin_access: bool,
    #[arg(long, help = "Concurrent revocation attempts")]
    pub(crate) workers: Option<usize>,
    #[arg(long, help = "Also write the full report as JSON to this path")]
    pub(crate) report: Option<PathBuf>,
    #[arg(long, env = "OFFBOARD_ACCESS_TOKEN", hide_env_values = true)]
    pub(crate) access_token: Option<String>,
}

impl RunArgs {
    /// Resolve the run parameters: configuration first, flags on top.
    pub(crate) fn run_config(&self, config: &AppConfig) -> CliResult<RunConfig> {
        let mut run = config.run_config(self.principal.trim(), self.mode);
        if self.allow_stale {
            run.allow_stale = true;
        }
        if self.refresh {
            run.force_refresh = true;
        }
        if self.no_cache {
            run.use_cache = false;
            run.allow_stale = false;
        }
        if let Some(workers) = self.workers {
            if workers == 0 {
                return Err(CliError::validation("--workers must be at least 1"));
            }
            run.workers = workers;
        }
        Ok(run)
    }
}

fn parse_mode(value: &str) -> Result<RunMode, String> {
    value
        .parse::<RunMode>()
        .map_err(|_| format!("unknown mode '{value}' (expected audit-only, revoke, or dry-run)"))
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum OutputFormat {
    Table,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, bail};

    fn parse_run(args: &[&str]) -> Result<(Cli, RunArgs)> {
        let mut argv = vec!["offboard", "run"];
        argv.extend_from_slice(args);
        let cli = Cli::try_parse_from(argv)?;
        let Command::Run(run) = &cli.command else {
            bail!("expected run command");
        };
        let run = run.clone();
        Ok((cli, run))
    }

    #[test]
    fn run_defaults_to_audit_only() -> Result<()> {
        let (cli, args) = parse_run(&["--principal", "alice@example.com"])?;
        assert_eq!(args.mode, RunMode::AuditOnly);
        assert_eq!(cli.output, OutputFormat::Table);
        assert!(!args.yes);
        assert!(!args.admin_access);
        Ok(())
    }

    #[test]
    fn flags_override_configuration() -> Result<()> {
        let (_, args) = parse_run(&[
            "--principal",
            " alice@example.com ",
            "--mode",
            "revoke",
            "--allow-stale",
            "--refresh",
            "--workers",
            "9",
            "--admin-access",
            "--output",
            "json",
        ])?;
        let run = args
            .run_config(&AppConfig::default())
            .map_err(|err| anyhow::anyhow!(err.display_message()))?;
        assert_eq!(run.principal, "alice@example.com");
        assert_eq!(run.mode, RunMode::Revoke);
        assert!(run.allow_stale);
        assert!(run.force_refresh);
        assert!(run.use_cache);
        assert_eq!(run.workers, 9);
        assert!(args.admin_access);
        Ok(())
    }

    #[test]
    fn no_cache_disables_cache_use() -> Result<()> {
        let (_, args) = parse_run(&["--principal", "a@example.com", "--no-cache"])?;
        let run = args
            .run_config(&AppConfig::default())
            .map_err(|err| anyhow::anyhow!(err.display_message()))?;
        assert!(!run.use_cache);
        assert!(!run.allow_stale);
        Ok(())
    }

    #[test]
    fn conflicting_or_invalid_flags_are_rejected() -> Result<()> {
        assert!(
            Cli::try_parse_from(["offboard", "run", "--principal", "a@example.com", "--no-cache", "--refresh"])
                .is_err()
        );
        assert!(
            Cli::try_parse_from(["offboard", "run", "--principal", "a@example.com", "--mode", "nuke"])
                .is_err()
        );
        let (_, args) = parse_run(&["--principal", "a@example.com", "--workers", "0"])?;
        let err = args
            .run_config(&AppConfig::default())
            .expect_err("zero workers");
        assert_eq!(err.exit_code(), 2);
        Ok(())
    }

    #[test]
    fn cache_subcommands_parse() -> Result<()> {
        let cli = Cli::try_parse_from(["offboard", "cache", "clear", "--scope", "me"])?;
        match cli.command {
            Command::Cache(CacheCommand::Clear(args)) => {
                assert_eq!(args.scope.as_deref(), Some("me"));
            }
            _ => bail!("expected cache clear"),
        }
        assert!(Cli::try_parse_from(["offboard", "cache", "purge", "--output", "json"]).is_ok());
        Ok(())
    }
}
