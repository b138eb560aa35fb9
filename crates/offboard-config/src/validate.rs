//! Range checks applied after loading and after CLI overrides.

use crate::error::{ConfigError, ConfigResult};
use crate::model::AppConfig;

const PAGE_SIZE_RANGE: std::ops::RangeInclusive<u32> = 1..=1000;

/// Validate every section of `config`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] for the first field out of range.
pub fn validate(config: &AppConfig) -> ConfigResult<()> {
    let scan = &config.scan;
    if scan.scope.trim().is_empty() {
        return Err(ConfigError::invalid("scan", "scope", None, "must not be empty"));
    }
    if scan.base_url.trim().is_empty() {
        return Err(ConfigError::invalid("scan", "base_url", None, "must not be empty"));
    }
    if !PAGE_SIZE_RANGE.contains(&scan.page_size) {
        return Err(ConfigError::invalid(
            "scan",
            "page_size",
            Some(scan.page_size.to_string()),
            "must be between 1 and 1000",
        ));
    }
    if scan.fetch_concurrency == 0 {
        return Err(ConfigError::invalid(
            "scan",
            "fetch_concurrency",
            Some("0".into()),
            "must be at least 1",
        ));
    }
    if scan.request_timeout_secs == 0 {
        return Err(ConfigError::invalid(
            "scan",
            "request_timeout_secs",
            Some("0".into()),
            "must be at least 1",
        ));
    }

    if config.cache.enabled && config.cache.dir.as_os_str().is_empty() {
        return Err(ConfigError::invalid("cache", "dir", None, "must not be empty"));
    }
    if config.cache.ttl_secs == 0 {
        return Err(ConfigError::invalid(
            "cache",
            "ttl_secs",
            Some("0".into()),
            "must be at least 1",
        ));
    }

    let revocation = &config.revocation;
    if revocation.workers == 0 {
        return Err(ConfigError::invalid(
            "revocation",
            "workers",
            Some("0".into()),
            "must be at least 1",
        ));
    }
    let retry = &revocation.retry;
    if retry.max_attempts == 0 {
        return Err(ConfigError::invalid(
            "revocation",
            "retry.max_attempts",
            Some("0".into()),
            "must be at least 1",
        ));
    }
    if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
        return Err(ConfigError::invalid(
            "revocation",
            "retry.multiplier",
            Some(retry.multiplier.to_string()),
            "must be a finite number of at least 1.0",
        ));
    }
    if retry.max_delay_ms < retry.base_delay_ms {
        return Err(ConfigError::invalid(
            "revocation",
            "retry.max_delay_ms",
            Some(retry.max_delay_ms.to_string()),
            "must be at least retry.base_delay_ms",
        ));
    }

    if config.audit.log_path.as_os_str().is_empty() {
        return Err(ConfigError::invalid("audit", "log_path", None, "must not be empty"));
    }
    if config.logging.level.trim().is_empty() {
        return Err(ConfigError::invalid("logging", "level", None, "must not be empty"));
    }
    Ok(())
}
