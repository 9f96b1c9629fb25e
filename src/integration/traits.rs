//! Core integration traits and types.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::secrets::{SecretError, SecretSource};
use crate::storage::MetricRecord;

/// Default backfill window for keys that were never synced (7 days).
pub const DEFAULT_BACKFILL_DAYS: u32 = 7;

/// Errors raised by provider integrations.
#[derive(Debug, Error)]
pub enum IntegrationError {
    /// Missing, expired, or rejected credential.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Upstream throttled the request (HTTP 429).
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Upstream failure (5xx or connection error).
    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    /// Timeout elapsed.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Response body could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// No integration registered for the metric type.
    #[error("unknown metric type: '{0}'")]
    UnknownMetric(String),
}

impl IntegrationError {
    /// Whether the next scheduled run may succeed without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_)
                | Self::Unavailable(_)
                | Self::Timeout(_)
                | Self::InvalidResponse(_)
        )
    }
}

impl From<SecretError> for IntegrationError {
    fn from(err: SecretError) -> Self {
        match err {
            SecretError::NotFound(key) => Self::Auth(format!("missing credential {key}")),
            SecretError::Backend(msg) => Self::Config(msg),
        }
    }
}

/// Time range `(since, until]` requested from a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchWindow {
    /// Exclusive lower bound: the last checkpoint or the backfill start.
    pub since: DateTime<Utc>,
    /// Inclusive upper bound, normally the run instant.
    pub until: DateTime<Utc>,
}

impl FetchWindow {
    pub fn new(since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self { since, until }
    }

    /// Backfill window ending at `now`.
    pub fn backfill(now: DateTime<Utc>, days: u32) -> Self {
        Self::new(now - TimeDelta::days(i64::from(days)), now)
    }

    /// Window starting at the checkpoint, or the backfill window if there is none.
    pub fn resolve(
        checkpoint: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        backfill_days: u32,
    ) -> Self {
        match checkpoint {
            Some(since) => Self::new(since, now),
            None => Self::backfill(now, backfill_days),
        }
    }

    /// No time has elapsed since the checkpoint.
    pub fn is_empty(&self) -> bool {
        self.since >= self.until
    }

    /// First calendar day (UTC) overlapping the window.
    pub fn first_day(&self) -> NaiveDate {
        self.since.date_naive()
    }

    /// Last calendar day (UTC) overlapping the window.
    pub fn last_day(&self) -> NaiveDate {
        let last = self.until.date_naive();
        if self.until == day_start(last) && last > self.first_day() {
            last.pred_opt().unwrap_or(last)
        } else {
            last
        }
    }

    /// Midnight (UTC) of the day containing `since`.
    ///
    /// Daily providers request from here so that a re-delivered day carries
    /// its whole-day total rather than the tail after the checkpoint.
    pub fn aligned_start(&self) -> DateTime<Utc> {
        day_start(self.first_day())
    }

    /// Whether any part of `date` (UTC) falls inside the window.
    pub fn contains_day(&self, date: NaiveDate) -> bool {
        let start = day_start(date);
        let end = start + TimeDelta::days(1);
        end > self.since && start < self.until
    }
}

/// Midnight UTC at the start of `date`.
pub fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// One dated value returned by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub date: NaiveDate,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<serde_json::Value>,
    /// Capture instant.
    pub timestamp: DateTime<Utc>,
}

impl DataPoint {
    pub fn new(date: NaiveDate, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            date,
            value,
            attributes: None,
            timestamp,
        }
    }

    /// Attach provider detail.
    pub fn with_attributes(mut self, attributes: serde_json::Value) -> Self {
        self.attributes = Some(attributes);
        self
    }

    /// Convert into a storable record for `(user_id, metric_type)`.
    pub fn into_record(self, user_id: &str, metric_type: &str) -> MetricRecord {
        MetricRecord {
            user_id: user_id.to_string(),
            metric_type: metric_type.to_string(),
            date: self.date,
            value: self.value,
            attributes: self.attributes,
            timestamp: self.timestamp,
        }
    }
}

/// A connected provider client for one user.
///
/// # Contract
///
/// - Never return points for days entirely at or before `window.since`.
/// - Retry transient upstream failures internally; report what remains with
///   the matching [`IntegrationError`] variant instead of swallowing it.
#[async_trait::async_trait]
pub trait Integration: Send + Sync {
    /// Provider name (e.g. "google_fit").
    fn provider(&self) -> &str;

    /// Fetch all points in `window`.
    async fn fetch_data(&self, window: &FetchWindow) -> Result<Vec<DataPoint>, IntegrationError>;
}

/// Builds an [`Integration`] for a user from their stored credentials.
#[async_trait::async_trait]
pub trait IntegrationFactory: Send + Sync {
    /// Provider name, also the credential namespace.
    fn provider(&self) -> &str;

    /// Look up credentials and return a ready client.
    async fn connect(
        &self,
        user_id: &str,
        secrets: &dyn SecretSource,
    ) -> Result<Box<dyn Integration>, IntegrationError>;
}
