//! metric-sync - Incremental Per-User Metric Synchronization
//!
//! Collects dated per-user metrics (daily steps, weather, hours worked) from
//! external providers and stores them durably. Each invocation is a single
//! batch run with no state kept in between; progress lives in per-pair
//! checkpoints.
//!
//! # Architecture
//!
//! - **Integration**: Provider clients behind one fetch trait, in an immutable registry
//! - **Storage**: SQLite metrics, checkpoint, and audit tables via sqlx
//! - **Sync**: Plans (user, metric) items; checkpoints advance only after persistence
//! - **Secrets**: Credential lookup from environment, files, or memory
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use metric_sync::{AppConfig, IntegrationRegistry, RunFilter, StorageBuilder, SyncEngine};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load("configs/config.yaml")?;
//! let handles = StorageBuilder::new(&config.database.path).build().await?;
//! let registry = IntegrationRegistry::from_config(&config.providers, &config.enabled_metrics)?;
//!
//! let engine = SyncEngine::from_handles(
//!     Arc::new(registry),
//!     config.secrets.build(),
//!     &handles,
//!     config.sync_options(),
//! );
//! let report = engine.run(&RunFilter::new().with_metric("steps")).await;
//! println!("{:?}", report.summary());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod integration;
pub mod secrets;
pub mod storage;
pub mod sync;

pub use config::{AppConfig, ConfigError};
pub use integration::{
    DataPoint, FetchWindow, Integration, IntegrationError, IntegrationFactory, IntegrationRegistry,
};
pub use secrets::{SecretError, SecretSource};
pub use storage::{
    MemoryStore, MetricRecord, MetricsStore, OutcomeLog, RunStateStore, StorageBuilder,
    StorageError, StorageHandles,
};
pub use sync::{
    ErrorKind, ItemOutcome, OutcomeStatus, Report, RunFilter, SyncEngine, SyncError, SyncOptions,
};
