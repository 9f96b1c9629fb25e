//! Store contracts consumed by the sync engine.
//!
//! The metrics store and the checkpoint store are separate traits so a
//! failing metrics write can never be mistaken for checkpoint progress.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::storage::StorageError;
use crate::storage::types::{MetricRecord, OutcomeRecord};

/// Idempotent store for dated metric values.
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Upsert every record at its `(user_id, metric_type, date)` identity.
    ///
    /// Safe to call repeatedly with identical or overlapping batches; the
    /// batch is applied atomically.
    async fn put_batch(&self, records: &[MetricRecord]) -> Result<(), StorageError>;

    /// Fetch a single record by identity.
    async fn get_record(
        &self,
        user_id: &str,
        metric_type: &str,
        date: NaiveDate,
    ) -> Result<Option<MetricRecord>, StorageError>;

    /// Total number of stored records.
    async fn count(&self) -> Result<u64, StorageError>;
}

/// Keyed checkpoint store for the last successful sync instant.
#[async_trait]
pub trait RunStateStore: Send + Sync {
    /// Last successful sync time, `None` if the pair was never synced.
    async fn get(
        &self,
        user_id: &str,
        metric_type: &str,
    ) -> Result<Option<DateTime<Utc>>, StorageError>;

    /// Atomically record `last_run_time` for the pair.
    ///
    /// A timestamp older than the stored one leaves the row unchanged.
    async fn set(
        &self,
        user_id: &str,
        metric_type: &str,
        last_run_time: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// Distinct users that have at least one checkpoint.
    async fn list_users(&self) -> Result<Vec<String>, StorageError>;
}

/// Append-only audit log of per-item outcomes.
#[async_trait]
pub trait OutcomeLog: Send + Sync {
    async fn append_outcomes(&self, outcomes: &[OutcomeRecord]) -> Result<(), StorageError>;

    async fn list_outcomes(&self, run_id: &str) -> Result<Vec<OutcomeRecord>, StorageError>;
}
