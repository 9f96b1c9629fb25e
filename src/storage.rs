//! Storage Layer
//!
//! SQLite persistence for the sync engine:
//! - **Metrics**: idempotent upserts keyed by `(user_id, "{date}#{metric_type}")`
//! - **Run state**: per `(user_id, metric_type)` checkpoints that never regress
//! - **Outcomes**: append-only audit rows, one per processed work item
//!
//! # Components
//!
//! - [`MetricsStore`] / [`RunStateStore`] / [`OutcomeLog`]: Store contracts
//! - [`SqliteStore`]: sqlx-backed implementation
//! - [`MemoryStore`]: In-process test double with injectable write failures
//! - [`StorageBuilder`] / [`StorageHandles`]: Initialization and lifecycle management

mod builder;
pub mod db;
mod error;
mod memory;
mod schema;
mod sqlite_store;
mod store;
mod types;

pub use builder::{StorageBuilder, StorageHandles};
pub use error::StorageError;
pub use memory::MemoryStore;
pub use sqlite_store::SqliteStore;
pub use store::{MetricsStore, OutcomeLog, RunStateStore};
pub use types::{DATE_FORMAT, MetricRecord, OutcomeRecord, metric_key};
