//! Parsing helpers shared by the config file and the CLI.

use std::sync::LazyLock;
use std::time::Duration;

use chrono::NaiveDate;
use regex::Regex;
use thiserror::Error;

use crate::storage::DATE_FORMAT;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// `${VAR}` or `${VAR:-default}`.
static ENV_VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("valid env var pattern")
});

/// Parse a human-readable duration such as `30s`, `5m`, or `1h30m`.
///
/// # Examples
///
/// ```
/// use metric_sync::config::parse_duration;
///
/// assert_eq!(parse_duration("45s").unwrap().as_secs(), 45);
/// assert_eq!(parse_duration("14m").unwrap().as_secs(), 840);
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration string is empty".to_string());
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Parse a `YYYY-MM-DD` calendar date.
pub fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
        .map_err(|e| format!("invalid date '{s}' (expected YYYY-MM-DD): {e}"))
}

/// Substitute environment variables in raw config text.
///
/// Unset variables without a default expand to an empty string.
pub fn expand_env_vars(input: &str) -> String {
    ENV_VAR_REGEX
        .replace_all(input, |caps: &regex::Captures| {
            let default_value = caps.get(2).map_or("", |m| m.as_str());
            std::env::var(&caps[1]).unwrap_or_else(|_| default_value.to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("60s").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration(" 10m ").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date("2024-03-09").unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()
        );
        assert!(parse_date("09/03/2024").is_err());
        assert!(parse_date("2024-02-30").is_err());
    }

    #[test]
    fn test_expand_env_vars_default() {
        assert_eq!(
            expand_env_vars("path: ${METRIC_SYNC_UNSET_DB_9931:-data/metrics.db}"),
            "path: data/metrics.db"
        );
        assert_eq!(expand_env_vars("plain: value"), "plain: value");
    }

    #[test]
    fn test_expand_env_vars_from_env() {
        // SAFETY: This test runs in isolation and only modifies a test-specific variable.
        unsafe {
            std::env::set_var("METRIC_SYNC_TEST_LAT", "48.85");
        }
        assert_eq!(
            expand_env_vars("latitude: ${METRIC_SYNC_TEST_LAT:-0}"),
            "latitude: 48.85"
        );
        // SAFETY: Cleanup test variable.
        unsafe {
            std::env::remove_var("METRIC_SYNC_TEST_LAT");
        }
    }
}
