//! Shared command context, error types, and exit codes for the CLI.

use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;

use anyhow::anyhow;
use offboard_config::{AppConfig, ConfigError};
use offboard_engine::EngineError;
use offboard_telemetry::Metrics;

use crate::cli::OutputFormat;

/// CLI-level error type to distinguish validation from operational failures.
#[derive(Debug)]
pub(crate) enum CliError {
    Validation(String),
    Failure(anyhow::Error),
    /// The run finished but some revocations failed.
    Partial { failed: usize },
}

/// Convenience alias for functions returning a `CliError`.
pub(crate) type CliResult<T> = Result<T, CliError>;

impl CliError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn failure(error: impl Into<anyhow::Error>) -> Self {
        Self::Failure(error.into())
    }

    pub(crate) const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::Failure(_) => 3,
            Self::Partial { .. } => 4,
        }
    }

    pub(crate) fn display_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Failure(error) => format!("{error:#}"),
            Self::Partial { failed } => {
                format!("{failed} revocation(s) failed; see the outcome log for details")
            }
        }
    }
}

impl Display for CliError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str("cli error")
    }
}

impl std::error::Error for CliError {}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        Self::validation(format!("invalid configuration: {err}{}", field_detail(&err)))
    }
}

impl From<EngineError> for CliError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidPrincipal { value } => {
                Self::validation(format!("'{value}' is not a valid principal email address"))
            }
            EngineError::SourceUnavailable {
                operation,
                stale_available,
                source,
            } => {
                let hint = if stale_available {
                    "; an expired snapshot exists (pass --allow-stale to use it)"
                } else {
                    ""
                };
                Self::failure(anyhow!(
                    "file source unavailable during {operation}: {}{hint}",
                    source.describe()
                ))
            }
            other => Self::failure(other),
        }
    }
}

fn field_detail(err: &ConfigError) -> String {
    match err {
        ConfigError::InvalidField {
            section,
            field,
            reason,
            ..
        } => format!(" ({section}.{field}: {reason})"),
        ConfigError::Io { path, source, .. } => format!(" ({}: {source})", path.display()),
        ConfigError::Parse { path, source } => format!(" ({}: {source})", path.display()),
        ConfigError::InvalidMode { value } => format!(" ({value})"),
    }
}

/// Application context passed to command handlers.
#[derive(Clone)]
pub(crate) struct AppContext {
    pub(crate) config: AppConfig,
    pub(crate) output: OutputFormat,
    pub(crate) metrics: Metrics,
    pub(crate) metrics_path: Option<PathBuf>,
}

impl AppContext {
    /// Write the Prometheus exposition to `--metrics`, when requested.
    pub(crate) fn flush_metrics(&self) -> CliResult<()> {
        let Some(path) = &self.metrics_path else {
            return Ok(());
        };
        let text = self.metrics.render().map_err(CliError::failure)?;
        std::fs::write(path, text).map_err(|err| {
            CliError::failure(anyhow!("failed to write metrics to {}: {err}", path.display()))
        })
    }
}
