//! In-process store for tests and embedders that need no database.
//!
//! Implements the same contracts as [`SqliteStore`](crate::storage::SqliteStore)
//! over ordered maps, with switches to make writes fail.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;

use crate::storage::StorageError;
use crate::storage::store::{MetricsStore, OutcomeLog, RunStateStore};
use crate::storage::types::{MetricRecord, OutcomeRecord, metric_key};

type PairKey = (String, String);

/// Map-backed metrics, checkpoint and audit store.
#[derive(Default)]
pub struct MemoryStore {
    metrics: RwLock<BTreeMap<PairKey, MetricRecord>>,
    run_state: RwLock<BTreeMap<PairKey, DateTime<Utc>>>,
    checkpoint_log: RwLock<Vec<(String, String, DateTime<Utc>)>>,
    outcomes: RwLock<Vec<OutcomeRecord>>,
    fail_metric_writes: AtomicBool,
    fail_checkpoint_writes: AtomicBool,
    metric_writes: AtomicU64,
    checkpoint_writes: AtomicU64,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("metric_writes", &self.metric_writes())
            .field("checkpoint_writes", &self.checkpoint_writes())
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put_batch` fail (or succeed again).
    pub fn fail_metric_writes(&self, fail: bool) {
        self.fail_metric_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent checkpoint `set` fail (or succeed again).
    pub fn fail_checkpoint_writes(&self, fail: bool) {
        self.fail_checkpoint_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of `put_batch` calls that were applied.
    pub fn metric_writes(&self) -> u64 {
        self.metric_writes.load(Ordering::SeqCst)
    }

    /// Number of checkpoint `set` calls that were applied.
    pub fn checkpoint_writes(&self) -> u64 {
        self.checkpoint_writes.load(Ordering::SeqCst)
    }

    /// Every accepted checkpoint write, in order.
    pub async fn checkpoint_log(&self) -> Vec<(String, String, DateTime<Utc>)> {
        self.checkpoint_log.read().await.clone()
    }

    /// All records for one user and metric, ordered by date.
    pub async fn records_for(&self, user_id: &str, metric_type: &str) -> Vec<MetricRecord> {
        self.metrics
            .read()
            .await
            .values()
            .filter(|r| r.user_id == user_id && r.metric_type == metric_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MetricsStore for MemoryStore {
    async fn put_batch(&self, records: &[MetricRecord]) -> Result<(), StorageError> {
        if self.fail_metric_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Rejected("metrics store unavailable".to_string()));
        }

        let mut metrics = self.metrics.write().await;
        for record in records {
            metrics.insert(
                (record.user_id.clone(), record.metric_key()),
                record.clone(),
            );
        }
        self.metric_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_record(
        &self,
        user_id: &str,
        metric_type: &str,
        date: NaiveDate,
    ) -> Result<Option<MetricRecord>, StorageError> {
        Ok(self
            .metrics
            .read()
            .await
            .get(&(user_id.to_string(), metric_key(date, metric_type)))
            .cloned())
    }

    async fn count(&self) -> Result<u64, StorageError> {
        Ok(self.metrics.read().await.len() as u64)
    }
}

#[async_trait]
impl RunStateStore for MemoryStore {
    async fn get(
        &self,
        user_id: &str,
        metric_type: &str,
    ) -> Result<Option<DateTime<Utc>>, StorageError> {
        Ok(self
            .run_state
            .read()
            .await
            .get(&(user_id.to_string(), metric_type.to_string()))
            .copied())
    }

    async fn set(
        &self,
        user_id: &str,
        metric_type: &str,
        last_run_time: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        if self.fail_checkpoint_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Rejected("run state store unavailable".to_string()));
        }

        let mut run_state = self.run_state.write().await;
        let entry = run_state
            .entry((user_id.to_string(), metric_type.to_string()))
            .or_insert(last_run_time);
        if last_run_time >= *entry {
            *entry = last_run_time;
            self.checkpoint_log.write().await.push((
                user_id.to_string(),
                metric_type.to_string(),
                last_run_time,
            ));
            self.checkpoint_writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<String>, StorageError> {
        let mut users: Vec<String> = self
            .run_state
            .read()
            .await
            .keys()
            .map(|(user, _)| user.clone())
            .collect();
        users.dedup();
        Ok(users)
    }
}

#[async_trait]
impl OutcomeLog for MemoryStore {
    async fn append_outcomes(&self, outcomes: &[OutcomeRecord]) -> Result<(), StorageError> {
        self.outcomes.write().await.extend_from_slice(outcomes);
        Ok(())
    }

    async fn list_outcomes(&self, run_id: &str) -> Result<Vec<OutcomeRecord>, StorageError> {
        Ok(self
            .outcomes
            .read()
            .await
            .iter()
            .filter(|o| o.run_id == run_id)
            .cloned()
            .collect())
    }
}
