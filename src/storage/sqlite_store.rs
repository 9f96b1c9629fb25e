//! SQLite implementation of the metrics, checkpoint and audit stores.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::Row;

use crate::storage::StorageError;
use crate::storage::db::SqlitePool;
use crate::storage::store::{MetricsStore, OutcomeLog, RunStateStore};
use crate::storage::types::{
    DATE_FORMAT, MetricRecord, OutcomeRecord, from_micros, metric_key, parse_date,
};

/// Store facade backed by a shared sqlx SQLite pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Create a store over an initialized pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl MetricsStore for SqliteStore {
    async fn put_batch(&self, records: &[MetricRecord]) -> Result<(), StorageError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.inner().begin().await?;
        for record in records {
            let attributes = record
                .attributes
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;

            sqlx::query(
                r#"
                INSERT INTO metrics (user_id, metric_key, metric_type, date, value, attributes, captured_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT (user_id, metric_key) DO UPDATE SET
                    value = excluded.value,
                    attributes = excluded.attributes,
                    captured_at = excluded.captured_at
                "#,
            )
            .bind(&record.user_id)
            .bind(record.metric_key())
            .bind(&record.metric_type)
            .bind(record.date.format(DATE_FORMAT).to_string())
            .bind(record.value)
            .bind(attributes)
            .bind(record.timestamp.timestamp_micros())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::debug!(count = records.len(), "Metric batch upserted");
        Ok(())
    }

    async fn get_record(
        &self,
        user_id: &str,
        metric_type: &str,
        date: NaiveDate,
    ) -> Result<Option<MetricRecord>, StorageError> {
        let row = sqlx::query(
            "SELECT date, value, attributes, captured_at FROM metrics
             WHERE user_id = ?1 AND metric_key = ?2",
        )
        .bind(user_id)
        .bind(metric_key(date, metric_type))
        .fetch_optional(self.pool.inner())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let date_str: String = row.try_get("date")?;
        let attributes: Option<String> = row.try_get("attributes")?;
        let captured_at: i64 = row.try_get("captured_at")?;

        Ok(Some(MetricRecord {
            user_id: user_id.to_string(),
            metric_type: metric_type.to_string(),
            date: parse_date(&date_str)?,
            value: row.try_get("value")?,
            attributes: attributes
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            timestamp: from_micros(captured_at)?,
        }))
    }

    async fn count(&self) -> Result<u64, StorageError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM metrics")
            .fetch_one(self.pool.inner())
            .await?;
        Ok(row.0.max(0) as u64)
    }
}

#[async_trait]
impl RunStateStore for SqliteStore {
    async fn get(
        &self,
        user_id: &str,
        metric_type: &str,
    ) -> Result<Option<DateTime<Utc>>, StorageError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT last_run_time FROM run_state WHERE user_id = ?1 AND metric_type = ?2",
        )
        .bind(user_id)
        .bind(metric_type)
        .fetch_optional(self.pool.inner())
        .await?;

        row.map(|(micros,)| from_micros(micros)).transpose()
    }

    async fn set(
        &self,
        user_id: &str,
        metric_type: &str,
        last_run_time: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        // Single statement upsert; the WHERE clause keeps the checkpoint monotonic.
        let result = sqlx::query(
            r#"
            INSERT INTO run_state (user_id, metric_type, last_run_time, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (user_id, metric_type) DO UPDATE SET
                last_run_time = excluded.last_run_time,
                updated_at = excluded.updated_at
            WHERE excluded.last_run_time >= run_state.last_run_time
            "#,
        )
        .bind(user_id)
        .bind(metric_type)
        .bind(last_run_time.timestamp_micros())
        .bind(Utc::now().timestamp_micros())
        .execute(self.pool.inner())
        .await?;

        if result.rows_affected() == 0 {
            tracing::warn!(
                user_id,
                metric_type,
                %last_run_time,
                "Ignored checkpoint older than the stored one"
            );
        }
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<String>, StorageError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT user_id FROM run_state ORDER BY user_id")
                .fetch_all(self.pool.inner())
                .await?;
        Ok(rows.into_iter().map(|(user,)| user).collect())
    }
}

#[async_trait]
impl OutcomeLog for SqliteStore {
    async fn append_outcomes(&self, outcomes: &[OutcomeRecord]) -> Result<(), StorageError> {
        if outcomes.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.inner().begin().await?;
        for outcome in outcomes {
            sqlx::query(
                r#"
                INSERT INTO sync_outcomes
                    (run_id, user_id, metric_type, status, error_kind, record_count,
                     error_detail, window_start, window_end, recorded_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
            )
            .bind(&outcome.run_id)
            .bind(&outcome.user_id)
            .bind(&outcome.metric_type)
            .bind(&outcome.status)
            .bind(&outcome.error_kind)
            .bind(outcome.record_count as i64)
            .bind(&outcome.error_detail)
            .bind(outcome.window_start.map(|t| t.timestamp_micros()))
            .bind(outcome.window_end.map(|t| t.timestamp_micros()))
            .bind(outcome.recorded_at.timestamp_micros())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_outcomes(&self, run_id: &str) -> Result<Vec<OutcomeRecord>, StorageError> {
        let rows = sqlx::query(
            "SELECT run_id, user_id, metric_type, status, error_kind, record_count,
                    error_detail, window_start, window_end, recorded_at
             FROM sync_outcomes WHERE run_id = ?1 ORDER BY id",
        )
        .bind(run_id)
        .fetch_all(self.pool.inner())
        .await?;

        rows.iter()
            .map(|row| -> Result<OutcomeRecord, StorageError> {
                let window_start: Option<i64> = row.try_get("window_start")?;
                let window_end: Option<i64> = row.try_get("window_end")?;
                let record_count: i64 = row.try_get("record_count")?;
                Ok(OutcomeRecord {
                    run_id: row.try_get("run_id")?,
                    user_id: row.try_get("user_id")?,
                    metric_type: row.try_get("metric_type")?,
                    status: row.try_get("status")?,
                    error_kind: row.try_get("error_kind")?,
                    record_count: record_count.max(0) as u64,
                    error_detail: row.try_get("error_detail")?,
                    window_start: window_start.map(from_micros).transpose()?,
                    window_end: window_end.map(from_micros).transpose()?,
                    recorded_at: from_micros(row.try_get("recorded_at")?)?,
                })
            })
            .collect()
    }
}
