//! Per-run outcome report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ErrorKind, OutcomeStatus, SyncError};
use crate::integration::FetchWindow;
use crate::storage::OutcomeRecord;

/// How one (user, metric) work item ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub user_id: String,
    pub metric: String,
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub record_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_end: Option<DateTime<Utc>>,
    pub checkpoint_advanced: bool,
}

impl ItemOutcome {
    pub fn success(
        user_id: impl Into<String>,
        metric: impl Into<String>,
        window: &FetchWindow,
        record_count: u64,
        checkpoint_advanced: bool,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            metric: metric.into(),
            status: OutcomeStatus::Success,
            error_kind: None,
            record_count,
            error_detail: None,
            window_start: Some(window.since),
            window_end: Some(window.until),
            checkpoint_advanced,
        }
    }

    pub fn failure(
        user_id: impl Into<String>,
        metric: impl Into<String>,
        window: Option<&FetchWindow>,
        error: &SyncError,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            metric: metric.into(),
            status: error.status(),
            error_kind: Some(error.kind()),
            record_count: 0,
            error_detail: Some(error.detail().to_string()),
            window_start: window.map(|w| w.since),
            window_end: window.map(|w| w.until),
            checkpoint_advanced: false,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status.is_failure()
    }

    /// Audit row for the `sync_outcomes` table.
    pub fn to_record(&self, run_id: Uuid, recorded_at: DateTime<Utc>) -> OutcomeRecord {
        OutcomeRecord {
            run_id: run_id.to_string(),
            user_id: self.user_id.clone(),
            metric_type: self.metric.clone(),
            status: self.status.to_string(),
            error_kind: self.error_kind.map(|k| k.to_string()),
            record_count: self.record_count,
            error_detail: self.error_detail.clone(),
            window_start: self.window_start,
            window_end: self.window_end,
            recorded_at,
        }
    }
}

/// Counts over a report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total: usize,
    pub succeeded: usize,
    pub transient_failures: usize,
    pub fatal_failures: usize,
    pub records: u64,
}

/// Result of one `run()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub run_id: Uuid,
    /// Instant used as `now` for every item.
    pub run_time: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// The run deadline elapsed; unfinished items are absent from `items`.
    pub truncated: bool,
    /// Outcomes in work-item order.
    pub items: Vec<ItemOutcome>,
}

impl Report {
    pub fn summary(&self) -> ReportSummary {
        let mut summary = ReportSummary {
            total: self.items.len(),
            ..Default::default()
        };
        for item in &self.items {
            match item.status {
                OutcomeStatus::Success => summary.succeeded += 1,
                OutcomeStatus::TransientFailure => summary.transient_failures += 1,
                OutcomeStatus::FatalFailure => summary.fatal_failures += 1,
            }
            summary.records += item.record_count;
        }
        summary
    }

    pub fn failed_items(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.items.iter().filter(|item| item.is_failure())
    }

    /// Whether the invocation as a whole failed.
    ///
    /// Fails when every item failed (at least one ran) or, in strict mode,
    /// when any item failed. A partial failure otherwise still succeeds.
    pub fn is_failure(&self, strict: bool) -> bool {
        if self.items.is_empty() {
            return false;
        }
        let failed = self.failed_items().count();
        failed == self.items.len() || (strict && failed > 0)
    }

    /// Audit rows for every item.
    pub fn to_records(&self) -> Vec<OutcomeRecord> {
        self.items
            .iter()
            .map(|item| item.to_record(self.run_id, self.finished_at))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(items: Vec<ItemOutcome>) -> Report {
        let now = Utc::now();
        Report {
            run_id: Uuid::new_v4(),
            run_time: now,
            started_at: now,
            finished_at: now,
            truncated: false,
            items,
        }
    }

    fn ok(user: &str, count: u64) -> ItemOutcome {
        let window = FetchWindow::backfill(Utc::now(), 7);
        ItemOutcome::success(user, "steps", &window, count, true)
    }

    fn failed(user: &str, err: SyncError) -> ItemOutcome {
        ItemOutcome::failure(user, "steps", None, &err)
    }

    #[test]
    fn test_failure_outcome_fields() {
        let item = failed("u1", SyncError::Auth("token expired".into()));
        assert_eq!(item.status, OutcomeStatus::FatalFailure);
        assert_eq!(item.error_kind, Some(ErrorKind::Auth));
        assert_eq!(item.error_detail.as_deref(), Some("token expired"));
        assert!(!item.checkpoint_advanced);
        assert!(item.window_start.is_none());
    }

    #[test]
    fn test_partial_failure_is_not_failure() {
        let report = report(vec![
            ok("u1", 7),
            failed("u2", SyncError::TransientFetch("429".into())),
        ]);
        assert!(!report.is_failure(false));
        assert!(report.is_failure(true));

        let summary = report.summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.transient_failures, 1);
        assert_eq!(summary.records, 7);
    }

    #[test]
    fn test_all_failed_is_failure() {
        let report = report(vec![
            failed("u1", SyncError::Configuration("unknown metric".into())),
            failed("u2", SyncError::Persistence("locked".into())),
        ]);
        assert!(report.is_failure(false));
        assert_eq!(report.summary().fatal_failures, 1);
    }

    #[test]
    fn test_empty_report_is_not_failure() {
        assert!(!report(Vec::new()).is_failure(true));
    }

    #[test]
    fn test_to_records() {
        let report = report(vec![failed("u1", SyncError::Persistence("timeout".into()))]);
        let records = report.to_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].run_id, report.run_id.to_string());
        assert_eq!(records[0].status, "transient_failure");
        assert_eq!(records[0].error_kind.as_deref(), Some("persistence"));
    }

    #[test]
    fn test_report_json_shape() {
        let json = serde_json::to_value(ok("u1", 3)).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["record_count"], 3);
        assert!(json.get("error_kind").is_none());
    }
}
