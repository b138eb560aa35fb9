//! YAML loader with `OFFBOARD_*` environment overrides.
//!
//! Precedence, lowest first: built-in defaults, the YAML file, environment
//! variables. Command-line flags are applied by the binary afterwards.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{AppConfig, LogStyle};
use crate::validate::validate;

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "OFFBOARD_";

/// Builder that resolves an [`AppConfig`].
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    path: Option<PathBuf>,
    env: BTreeMap<String, String>,
}

impl ConfigLoader {
    #[must_use]
    /// Loader with no file and no environment.
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    /// Read the YAML document at `path`.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    /// Capture every `OFFBOARD_*` variable from the process environment.
    pub fn with_process_env(mut self) -> Self {
        self.env.extend(
            std::env::vars().filter(|(key, _)| key.starts_with(ENV_PREFIX)),
        );
        self
    }

    #[must_use]
    /// Add a single override (used by tests and embedding callers).
    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Resolve, override, and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] or [`ConfigError::Parse`] when the file
    /// cannot be read, and [`ConfigError::InvalidField`] when an override or
    /// the merged result is invalid.
    pub fn load(&self) -> ConfigResult<AppConfig> {
        let mut config = match &self.path {
            Some(path) => read_file(path)?,
            None => AppConfig::default(),
        };
        self.apply_env(&mut config)?;
        validate(&config)?;
        Ok(config)
    }

    fn apply_env(&self, config: &mut AppConfig) -> ConfigResult<()> {
        for (key, value) in &self.env {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "SCOPE" => config.scan.scope.clone_from(value),
                "BASE_URL" => config.scan.base_url.clone_from(value),
                "PAGE_SIZE" => config.scan.page_size = parse_env(key, value)?,
                "FETCH_CONCURRENCY" => config.scan.fetch_concurrency = parse_env(key, value)?,
                "REQUEST_TIMEOUT_SECS" => config.scan.request_timeout_secs = parse_env(key, value)?,
                "ADMIN_ACCESS" => config.scan.admin_access = parse_flag(key, value)?,
                "CACHE_ENABLED" => config.cache.enabled = parse_flag(key, value)?,
                "CACHE_DIR" => config.cache.dir = PathBuf::from(value),
                "CACHE_TTL_SECS" => config.cache.ttl_secs = parse_env(key, value)?,
                "ALLOW_STALE" => config.cache.allow_stale = parse_flag(key, value)?,
                "CACHE_COMPRESSION" => config.cache.compression = parse_flag(key, value)?,
                "WORKERS" => config.revocation.workers = parse_env(key, value)?,
                "RETRY_MAX_ATTEMPTS" => config.revocation.retry.max_attempts = parse_env(key, value)?,
                "RETRY_BASE_DELAY_MS" => {
                    config.revocation.retry.base_delay_ms = parse_env(key, value)?;
                }
                "RETRY_MAX_DELAY_MS" => {
                    config.revocation.retry.max_delay_ms = parse_env(key, value)?;
                }
                "RETRY_JITTER" => config.revocation.retry.jitter = parse_flag(key, value)?,
                "AUDIT_LOG" => config.audit.log_path = PathBuf::from(value),
                "LOG_LEVEL" => config.logging.level.clone_from(value),
                "LOG_FORMAT" => config.logging.format = parse_style(key, value)?,
                // Credentials and per-run values are read by the binary.
                _ => {
                    debug!(variable = %key, "environment variable not a config override");
                }
            }
        }
        Ok(())
    }
}

fn read_file(path: &Path) -> ConfigResult<AppConfig> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        operation: "config.read",
        path: path.to_path_buf(),
        source,
    })?;
    if raw.trim().is_empty() {
        return Ok(AppConfig::default());
    }
    serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> ConfigResult<T> {
    value.trim().parse().map_err(|_| {
        ConfigError::invalid("env", key, Some(value.to_string()), "must be a number")
    })
}

fn parse_flag(key: &str, value: &str) -> ConfigResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(
            "env",
            key,
            Some(value.to_string()),
            "must be a boolean",
        )),
    }
}

fn parse_style(key: &str, value: &str) -> ConfigResult<LogStyle> {
    match value.trim().to_ascii_lowercase().as_str() {
        "auto" => Ok(LogStyle::Auto),
        "pretty" | "text" => Ok(LogStyle::Pretty),
        "json" => Ok(LogStyle::Json),
        _ => Err(ConfigError::invalid(
            "env",
            key,
            Some(value.to_string()),
            "must be auto, pretty, or json",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    fn write_yaml(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .expect("temp file");
        file.write_all(contents.as_bytes()).expect("write yaml");
        file
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = ConfigLoader::new()
            .with_path("/definitely/not/here.yaml")
            .load()
            .expect_err("missing file");
        assert!(matches!(err, ConfigError::Io { operation: "config.read", .. }));
    }

    #[test]
    fn yaml_sections_override_defaults() {
        let file = write_yaml(
            "scan:\n  scope: ops@example.com\n  page_size: 250\ncache:\n  ttl_secs: 60\n  allow_stale: true\nrevocation:\n  workers: 2\n  retry:\n    max_attempts: 3\n    jitter: false\n",
        );
        let config = ConfigLoader::new().with_path(file.path()).load().expect("load");
        assert_eq!(config.scan.scope, "ops@example.com");
        assert_eq!(config.scan.page_size, 250);
        assert_eq!(config.cache.ttl(), Duration::from_secs(60));
        assert!(config.cache.allow_stale);
        assert_eq!(config.revocation.workers, 2);
        assert_eq!(config.revocation.retry.max_attempts, 3);
        assert!(!config.revocation.retry.jitter);
        assert_eq!(config.revocation.retry.base_delay_ms, 500);
    }

    #[test]
    fn empty_file_yields_defaults() {
        let file = write_yaml("\n");
        let config = ConfigLoader::new().with_path(file.path()).load().expect("load");
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        let file = write_yaml("scan: [unterminated");
        let err = ConfigLoader::new()
            .with_path(file.path())
            .load()
            .expect_err("malformed");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn environment_wins_over_file() {
        let file = write_yaml("cache:\n  ttl_secs: 60\n");
        let config = ConfigLoader::new()
            .with_path(file.path())
            .with_env_var("OFFBOARD_CACHE_TTL_SECS", "120")
            .with_env_var("OFFBOARD_ALLOW_STALE", "yes")
            .with_env_var("OFFBOARD_ADMIN_ACCESS", "true")
            .with_env_var("OFFBOARD_LOG_FORMAT", "json")
            .with_env_var("OFFBOARD_ACCESS_TOKEN", "ignored")
            .load()
            .expect("load");
        assert_eq!(config.cache.ttl_secs, 120);
        assert!(config.cache.allow_stale);
        assert!(config.scan.admin_access);
        assert_eq!(config.logging.format, LogStyle::Json);
    }

    #[test]
    fn invalid_override_reports_variable() {
        let err = ConfigLoader::new()
            .with_env_var("OFFBOARD_WORKERS", "many")
            .load()
            .expect_err("invalid");
        match err {
            ConfigError::InvalidField { section, field, .. } => {
                assert_eq!(section, "env");
                assert_eq!(field, "OFFBOARD_WORKERS");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn overrides_are_validated() {
        let err = ConfigLoader::new()
            .with_env_var("OFFBOARD_PAGE_SIZE", "5000")
            .load()
            .expect_err("out of range");
        assert!(matches!(err, ConfigError::InvalidField { section: "scan", .. }));
    }
}
