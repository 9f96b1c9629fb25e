//! Invocation payload.

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::SyncError;
use crate::config::parse_date;
use crate::integration::{FetchWindow, day_start};

/// Narrows a run to a subset of work items and optionally pins the window.
///
/// Payload form: `{"metric": "steps", "user_id": "u1", "start_date":
/// "2024-03-01", "end_date": "2024-03-07"}`, every field optional. Empty
/// strings count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// First day to re-collect (manual run).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    /// Last day to re-collect (manual run).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
struct RawPayload {
    #[serde(default)]
    metric: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    start_date: Option<String>,
    #[serde(default)]
    end_date: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl RunFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metric(mut self, metric: impl Into<String>) -> Self {
        self.metric = Some(metric.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_dates(
        mut self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Self {
        self.start_date = start_date;
        self.end_date = end_date;
        self
    }

    /// Parse a JSON invocation payload.
    ///
    /// # Errors
    /// Returns `SyncError::Configuration` for malformed JSON, bad dates, or
    /// `start_date` after `end_date`.
    pub fn from_json(payload: &str) -> Result<Self, SyncError> {
        let raw: RawPayload = if payload.trim().is_empty() {
            RawPayload::default()
        } else {
            serde_json::from_str(payload)
                .map_err(|e| SyncError::Configuration(format!("invalid payload: {e}")))?
        };

        let parse = |value: Option<String>| {
            non_empty(value)
                .map(|v| parse_date(&v))
                .transpose()
                .map_err(SyncError::Configuration)
        };

        let filter = Self {
            metric: non_empty(raw.metric),
            user_id: non_empty(raw.user_id),
            start_date: parse(raw.start_date)?,
            end_date: parse(raw.end_date)?,
        };
        filter.validate()?;
        Ok(filter)
    }

    /// # Errors
    /// Returns `SyncError::Configuration` if `start_date` is after `end_date`.
    pub fn validate(&self) -> Result<(), SyncError> {
        if let (Some(start), Some(end)) = (self.start_date, self.end_date)
            && start > end
        {
            return Err(SyncError::Configuration(format!(
                "start_date {start} is after end_date {end}"
            )));
        }
        Ok(())
    }

    /// Whether the window is pinned by dates. Manual runs never move checkpoints.
    pub fn is_manual(&self) -> bool {
        self.start_date.is_some() || self.end_date.is_some()
    }

    /// Fetch window for one item.
    ///
    /// `start_date` replaces the checkpoint/backfill lower bound; `end_date`
    /// caps the upper bound at the end of that day, never past `now`.
    pub fn window(
        &self,
        checkpoint: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        backfill_days: u32,
    ) -> FetchWindow {
        let mut window = FetchWindow::resolve(checkpoint, now, backfill_days);
        if let Some(start) = self.start_date {
            window.since = day_start(start);
        }
        if let Some(end) = self.end_date {
            window.until = (day_start(end) + TimeDelta::days(1)).min(now);
        }
        window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_payload() {
        let filter = RunFilter::from_json(r#"{"metric": "steps", "user_id": "u1"}"#).unwrap();
        assert_eq!(filter, RunFilter::new().with_metric("steps").with_user("u1"));
        assert!(!filter.is_manual());

        assert_eq!(RunFilter::from_json("").unwrap(), RunFilter::default());
        assert_eq!(RunFilter::from_json("{}").unwrap(), RunFilter::default());
    }

    #[test]
    fn test_empty_strings_are_absent() {
        let filter =
            RunFilter::from_json(r#"{"metric": "", "user_id": " ", "start_date": ""}"#).unwrap();
        assert_eq!(filter, RunFilter::default());
    }

    #[test]
    fn test_extra_fields_are_ignored() {
        let payload = r#"{"metric": "weather", "source": "scheduler"}"#;
        let filter = RunFilter::from_json(payload).unwrap();
        assert_eq!(filter.metric.as_deref(), Some("weather"));
    }

    #[test]
    fn test_invalid_payloads() {
        assert!(RunFilter::from_json("[1, 2]").is_err());
        assert!(RunFilter::from_json(r#"{"start_date": "March 1"}"#).is_err());

        let err = RunFilter::from_json(r#"{"start_date": "2024-03-07", "end_date": "2024-03-01"}"#)
            .unwrap_err();
        assert!(matches!(err, SyncError::Configuration(ref m) if m.contains("after end_date")));
    }

    #[test]
    fn test_manual_window() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let filter = RunFilter::new().with_dates(Some(date(2024, 3, 1)), Some(date(2024, 3, 2)));
        assert!(filter.is_manual());

        let window = filter.window(None, now, 7);
        assert_eq!(window.since, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
        assert_eq!(window.until, Utc.with_ymd_and_hms(2024, 3, 3, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_end_date_capped_at_now() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let checkpoint = Utc.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap();
        let filter = RunFilter::new().with_dates(None, Some(date(2024, 3, 10)));

        let window = filter.window(Some(checkpoint), now, 7);
        assert_eq!(window.since, checkpoint);
        assert_eq!(window.until, now);
    }
}
