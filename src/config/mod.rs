//! Configuration module for metric-sync.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Database settings (path, pool size)
//! - Sync engine settings (concurrency, timeouts, deadline, backfill)
//! - Known users and enabled metrics
//! - Secret backend and per-provider settings

mod app;
mod providers;
mod validation;

pub use app::{AppConfig, DEFAULT_DB_PATH, DatabaseConfig, MAX_BACKFILL_DAYS, SyncConfig};
pub use providers::ProvidersConfig;
pub use validation::{ConfigError, expand_env_vars, parse_date, parse_duration};
