//! Application configuration structures.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::integration::{BUILTIN_METRICS, DEFAULT_BACKFILL_DAYS};
use crate::secrets::SecretsConfig;
use crate::storage::db::DEFAULT_MAX_CONNECTIONS;
use crate::sync::{
    DEFAULT_CONCURRENCY, DEFAULT_FETCH_TIMEOUT, DEFAULT_STORE_TIMEOUT, DEFAULT_USER, SyncOptions,
};

use super::providers::ProvidersConfig;
use super::validation::{ConfigError, expand_env_vars};

// =============================================================================
// Constants
// =============================================================================

/// Default database location.
pub const DEFAULT_DB_PATH: &str = "data/metric-sync.db";

/// Longest accepted backfill (one year).
pub const MAX_BACKFILL_DAYS: u32 = 366;

fn default_db_path() -> String {
    DEFAULT_DB_PATH.to_string()
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_fetch_timeout() -> Duration {
    DEFAULT_FETCH_TIMEOUT
}

fn default_store_timeout() -> Duration {
    DEFAULT_STORE_TIMEOUT
}

fn default_backfill_days() -> u32 {
    DEFAULT_BACKFILL_DAYS
}

fn default_user() -> String {
    DEFAULT_USER.to_string()
}

// =============================================================================
// Database Configuration
// =============================================================================

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path or `sqlite:` URL (default: "data/metric-sync.db").
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Connection pool size (default: 5).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

// =============================================================================
// Sync Configuration
// =============================================================================

/// Engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Items processed concurrently (default: 4).
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Connect + fetch timeout per item (default: 60s).
    #[serde(default = "default_fetch_timeout", with = "humantime_serde")]
    pub fetch_timeout: Duration,

    /// Timeout per store call (default: 10s).
    #[serde(default = "default_store_timeout", with = "humantime_serde")]
    pub store_timeout: Duration,

    /// Overall run budget, e.g. the host's execution limit minus headroom.
    #[serde(default, with = "humantime_serde")]
    pub run_deadline: Option<Duration>,

    /// Days fetched for a pair with no checkpoint (default: 7).
    #[serde(default = "default_backfill_days")]
    pub backfill_days: u32,

    /// Fail the invocation if any item fails.
    #[serde(default)]
    pub strict: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            run_deadline: None,
            backfill_days: DEFAULT_BACKFILL_DAYS,
            strict: false,
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    /// Users synced on every run, in addition to users with checkpoints.
    #[serde(default)]
    pub users: Vec<String>,

    /// User synced when no other user is known (default: "default").
    #[serde(default = "default_user")]
    pub default_user: String,

    /// Metric types to register; empty means all built-in metrics.
    #[serde(default)]
    pub enabled_metrics: Vec<String>,

    #[serde(default)]
    pub secrets: SecretsConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            sync: SyncConfig::default(),
            users: Vec::new(),
            default_user: default_user(),
            enabled_metrics: Vec::new(),
            secrets: SecretsConfig::default(),
            providers: ProvidersConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file, expanding `${VAR:-default}` first.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse and validate YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(&expand_env_vars(content))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

        if self.database.path.trim().is_empty() {
            return invalid("database path cannot be empty".to_string());
        }
        if self.database.max_connections == 0 {
            return invalid("database max_connections must be positive".to_string());
        }

        if self.sync.concurrency == 0 {
            return invalid("sync concurrency must be positive".to_string());
        }
        if self.sync.fetch_timeout.is_zero() || self.sync.store_timeout.is_zero() {
            return invalid("sync timeouts must be positive".to_string());
        }
        if self.sync.run_deadline.is_some_and(|d| d.is_zero()) {
            return invalid("sync run_deadline must be positive".to_string());
        }
        if self.sync.backfill_days == 0 || self.sync.backfill_days > MAX_BACKFILL_DAYS {
            return invalid(format!(
                "sync backfill_days must be between 1 and {MAX_BACKFILL_DAYS}"
            ));
        }

        if self.default_user.trim().is_empty() {
            return invalid("default_user cannot be empty".to_string());
        }
        if let Some(user) = self.users.iter().find(|u| u.trim().is_empty()) {
            return invalid(format!("invalid user id: '{user}'"));
        }

        for metric in &self.enabled_metrics {
            if !BUILTIN_METRICS.contains(&metric.as_str()) {
                return invalid(format!(
                    "unknown metric '{metric}' in enabled_metrics (available: {})",
                    BUILTIN_METRICS.join(", ")
                ));
            }
        }

        self.secrets
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("secrets: {e}")))?;
        self.providers.validate()?;

        Ok(())
    }

    /// Engine options derived from this configuration.
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            concurrency: self.sync.concurrency,
            fetch_timeout: self.sync.fetch_timeout,
            store_timeout: self.sync.store_timeout,
            run_deadline: self.sync.run_deadline,
            backfill_days: self.sync.backfill_days,
            users: self.users.clone(),
            default_user: self.default_user.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::SecretBackend;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::from_yaml("{}").unwrap();
        assert_eq!(config.database.path, DEFAULT_DB_PATH);
        assert_eq!(config.sync.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.sync.backfill_days, 7);
        assert_eq!(config.default_user, "default");
        assert!(!config.sync.strict);
        assert!(config.enabled_metrics.is_empty());
        assert_eq!(config.secrets.backend, SecretBackend::Env);
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
database:
  path: /var/lib/metric-sync/metrics.db
  max_connections: 2
sync:
  concurrency: 8
  fetch_timeout: 30s
  store_timeout: 2s
  run_deadline: 14m
  backfill_days: 14
  strict: true
users: [u1, u2]
enabled_metrics: [steps, tasks]
secrets:
  backend: file
  path: /run/secrets/metric-sync
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.database.max_connections, 2);
        assert_eq!(config.sync.run_deadline, Some(Duration::from_secs(14 * 60)));
        assert!(config.sync.strict);

        let options = config.sync_options();
        assert_eq!(options.concurrency, 8);
        assert_eq!(options.fetch_timeout, Duration::from_secs(30));
        assert_eq!(options.backfill_days, 14);
        assert_eq!(options.users, vec!["u1", "u2"]);
    }

    #[test]
    fn test_env_expansion() {
        // SAFETY: This test runs in isolation and only modifies a test-specific variable.
        unsafe {
            std::env::set_var("METRIC_SYNC_TEST_DB_PATH", "/tmp/from-env.db");
        }
        let config =
            AppConfig::from_yaml("database:\n  path: ${METRIC_SYNC_TEST_DB_PATH:-x.db}\n").unwrap();
        assert_eq!(config.database.path, "/tmp/from-env.db");
        // SAFETY: Cleanup test variable.
        unsafe {
            std::env::remove_var("METRIC_SYNC_TEST_DB_PATH");
        }
    }

    #[test]
    fn test_validation_errors() {
        let cases = [
            ("sync:\n  concurrency: 0\n", "concurrency"),
            ("sync:\n  backfill_days: 0\n", "backfill_days"),
            ("enabled_metrics: [sleep]\n", "unknown metric 'sleep'"),
            ("default_user: ''\n", "default_user"),
            ("secrets:\n  backend: file\n", "secrets"),
        ];
        for (yaml, expected) in cases {
            let err = AppConfig::from_yaml(yaml).unwrap_err();
            assert!(
                err.to_string().contains(expected),
                "{yaml:?} -> {err}"
            );
        }
    }

    #[test]
    fn test_sample_config_is_valid() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/configs/config.yaml");
        let config = AppConfig::load(path).unwrap();
        assert_eq!(config.sync.run_deadline, Some(Duration::from_secs(14 * 60)));
        assert_eq!(config.secrets.backend, SecretBackend::Env);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "users: [alice]\n").unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.users, vec!["alice"]);

        assert!(matches!(
            AppConfig::load(dir.path().join("missing.yaml")),
            Err(ConfigError::IoError(_))
        ));
    }
}
