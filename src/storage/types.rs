//! Core data types for the storage layer.
//!
//! - [`MetricRecord`]: One dated metric value for a user, keyed by
//!   `(user_id, metric_type, date)`
//! - [`OutcomeRecord`]: Audit row describing how one work item ended

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Date format used in sort keys and the `date` column.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Build the per-user sort key `"{date}#{metric_type}"`.
pub fn metric_key(date: NaiveDate, metric_type: &str) -> String {
    format!("{}#{}", date.format(DATE_FORMAT), metric_type)
}

/// A dated metric value stored in the `metrics` table.
///
/// Identity is `(user_id, metric_type, date)`. Writing a record with an
/// existing identity overwrites the stored value in place.
///
/// # Example
///
/// ```
/// use metric_sync::storage::MetricRecord;
/// use chrono::{NaiveDate, Utc};
///
/// let record = MetricRecord {
///     user_id: "u1".to_string(),
///     metric_type: "steps".to_string(),
///     date: NaiveDate::from_ymd_opt(2026, 1, 30).unwrap(),
///     value: 8432.0,
///     attributes: None,
///     timestamp: Utc::now(),
/// };
/// assert_eq!(record.metric_key(), "2026-01-30#steps");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Owner of the metric.
    pub user_id: String,
    /// Metric type key (e.g. "steps", "weather").
    pub metric_type: String,
    /// Calendar day the value belongs to.
    pub date: NaiveDate,
    /// Numeric value for the day.
    pub value: f64,
    /// Provider-specific detail as a JSON object.
    pub attributes: Option<serde_json::Value>,
    /// Instant the value was captured from the provider.
    pub timestamp: DateTime<Utc>,
}

impl MetricRecord {
    /// Sort key within the user partition.
    pub fn metric_key(&self) -> String {
        metric_key(self.date, &self.metric_type)
    }
}

/// Per-item audit row stored in the `sync_outcomes` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub run_id: String,
    pub user_id: String,
    pub metric_type: String,
    /// `success`, `transient_failure` or `fatal_failure`.
    pub status: String,
    pub error_kind: Option<String>,
    pub record_count: u64,
    pub error_detail: Option<String>,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub recorded_at: DateTime<Utc>,
}

/// Convert a stored microsecond timestamp back into a UTC instant.
pub(crate) fn from_micros(
    value: i64,
) -> Result<DateTime<Utc>, crate::storage::StorageError> {
    DateTime::from_timestamp_micros(value).ok_or_else(|| {
        crate::storage::StorageError::InvalidData(format!("timestamp out of range: {value}"))
    })
}

/// Parse a stored `YYYY-MM-DD` date.
pub(crate) fn parse_date(value: &str) -> Result<NaiveDate, crate::storage::StorageError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|e| crate::storage::StorageError::InvalidData(format!("bad date '{value}': {e}")))
}
