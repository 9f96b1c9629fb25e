//! ClickUp hours worked per day, from completed tasks.
//!
//! Credentials under `clickup/<user>/`: `token`, `list_id`, `team_id`.
//! The dashed names `list-id` and `team-id` are accepted as well, so existing
//! credential trees keep working.
//! Each completed task contributes `date_done - start_date`, split at UTC
//! midnight. The stored value is the day's total hours; attributes carry the
//! per-type breakdown and the tags seen that day.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::http::{RetryPolicy, build_client, decode_json, send_with_retry};
use super::traits::day_start;
use super::{DataPoint, FetchWindow, Integration, IntegrationError, IntegrationFactory};
use crate::secrets::{SecretSource, require_secret, require_secret_any};

/// Provider name and credential namespace.
pub const PROVIDER: &str = "clickup";

const DEFAULT_BASE_URL: &str = "https://api.clickup.com/api/v2";
const DEFAULT_STATUS: &str = "done";
const DEFAULT_MAX_PAGES: u32 = 100;
const UNKNOWN_TYPE: &str = "unknown";
const MILLIS_PER_HOUR: f64 = 3_600_000.0;
const LIST_ID_KEYS: [&str; 2] = ["list_id", "list-id"];
const TEAM_ID_KEYS: [&str; 2] = ["team_id", "team-id"];

/// Default request timeout (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_status() -> String {
    DEFAULT_STATUS.to_string()
}

fn default_max_pages() -> u32 {
    DEFAULT_MAX_PAGES
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

/// Configuration for the ClickUp integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickUpConfig {
    /// API root (default: "https://api.clickup.com/api/v2").
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Task status counted as completed (default: "done").
    #[serde(default = "default_status")]
    pub status: String,
    /// Page limit per fetch (default: 100).
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    /// Request timeout (default: 30s).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for ClickUpConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            status: default_status(),
            max_pages: DEFAULT_MAX_PAGES,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

impl ClickUpConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.is_empty() {
            return Err("base_url cannot be empty".to_string());
        }
        if self.max_pages == 0 {
            return Err("max_pages must be positive".to_string());
        }
        if self.timeout.is_zero() {
            return Err("timeout must be positive".to_string());
        }
        self.retry.validate()
    }
}

#[derive(Debug, Default, Deserialize)]
struct CustomItemsResponse {
    #[serde(default)]
    custom_items: Vec<CustomItem>,
}

#[derive(Debug, Deserialize)]
struct CustomItem {
    id: i64,
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct TaskPage {
    #[serde(default)]
    tasks: Vec<Task>,
    #[serde(default)]
    last_page: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
struct Task {
    #[serde(default)]
    id: String,
    #[serde(default)]
    start_date: Option<String>,
    #[serde(default)]
    date_done: Option<String>,
    #[serde(default)]
    custom_item_id: Option<i64>,
    #[serde(default)]
    tags: Vec<Tag>,
}

#[derive(Debug, Clone, Deserialize)]
struct Tag {
    name: String,
}

/// Lower-case a type name and replace spaces with `_`.
fn normalize_type(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

fn round_hours(hours: f64) -> f64 {
    (hours * 100.0).round() / 100.0
}

fn parse_millis(raw: &str) -> Option<DateTime<Utc>> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
}

/// Split `[start, end)` at each UTC midnight.
fn split_by_day(start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<(NaiveDate, TimeDelta)> {
    let mut pieces = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let date = cursor.date_naive();
        let next_midnight = day_start(date) + TimeDelta::days(1);
        let piece_end = next_midnight.min(end);
        pieces.push((date, piece_end - cursor));
        cursor = piece_end;
    }
    pieces
}

#[derive(Debug, Default)]
struct DayTotals {
    by_type: BTreeMap<String, f64>,
    tags: BTreeSet<String>,
}

/// Aggregate tasks into one point per day inside `window`.
fn aggregate_tasks(
    tasks: &[Task],
    custom_types: &HashMap<i64, String>,
    window: &FetchWindow,
    captured_at: DateTime<Utc>,
) -> Vec<DataPoint> {
    let mut days: BTreeMap<NaiveDate, DayTotals> = BTreeMap::new();

    for task in tasks {
        let (Some(start), Some(end)) = (
            task.start_date.as_deref().and_then(parse_millis),
            task.date_done.as_deref().and_then(parse_millis),
        ) else {
            tracing::debug!(task_id = %task.id, "Skipping task without start/end time");
            continue;
        };

        let task_type = task
            .custom_item_id
            .and_then(|id| custom_types.get(&id))
            .map(|name| normalize_type(name))
            .unwrap_or_else(|| UNKNOWN_TYPE.to_string());

        for (date, duration) in split_by_day(start, end) {
            if !window.contains_day(date) {
                continue;
            }
            let totals = days.entry(date).or_default();
            *totals.by_type.entry(task_type.clone()).or_default() +=
                duration.num_milliseconds() as f64 / MILLIS_PER_HOUR;
            totals
                .tags
                .extend(task.tags.iter().map(|tag| tag.name.clone()));
        }
    }

    days.into_iter()
        .map(|(date, totals)| {
            let total = round_hours(totals.by_type.values().sum());
            let by_type: serde_json::Map<String, serde_json::Value> = totals
                .by_type
                .into_iter()
                .map(|(name, hours)| (name, round_hours(hours).into()))
                .collect();
            DataPoint::new(date, total, captured_at).with_attributes(serde_json::json!({
                "by_type": by_type,
                "tags": totals.tags,
            }))
        })
        .collect()
}

/// Builds [`ClickUpIntegration`]s.
#[derive(Debug, Clone)]
pub struct ClickUpFactory {
    config: ClickUpConfig,
    client: Client,
}

impl ClickUpFactory {
    pub fn new(config: ClickUpConfig) -> Result<Self, IntegrationError> {
        let client = build_client(config.timeout)?;
        Ok(Self { config, client })
    }
}

#[async_trait::async_trait]
impl IntegrationFactory for ClickUpFactory {
    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn connect(
        &self,
        user_id: &str,
        secrets: &dyn SecretSource,
    ) -> Result<Box<dyn Integration>, IntegrationError> {
        let token = require_secret(secrets, PROVIDER, user_id, "token").await?;
        let list_id = require_secret_any(secrets, PROVIDER, user_id, &LIST_ID_KEYS).await?;
        let team_id = require_secret_any(secrets, PROVIDER, user_id, &TEAM_ID_KEYS).await?;

        let integration = ClickUpIntegration {
            config: self.config.clone(),
            client: self.client.clone(),
            user_id: user_id.to_string(),
            token,
            list_id,
            custom_types: HashMap::new(),
        };
        let custom_types = integration.load_custom_types(&team_id).await?;

        Ok(Box::new(ClickUpIntegration {
            custom_types,
            ..integration
        }))
    }
}

/// ClickUp client for one user.
pub struct ClickUpIntegration {
    config: ClickUpConfig,
    client: Client,
    user_id: String,
    token: String,
    list_id: String,
    custom_types: HashMap<i64, String>,
}

impl std::fmt::Debug for ClickUpIntegration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClickUpIntegration")
            .field("user_id", &self.user_id)
            .field("list_id", &self.list_id)
            .field("custom_types", &self.custom_types.len())
            .finish_non_exhaustive()
    }
}

impl ClickUpIntegration {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Load custom task type names. Only credential errors are fatal; other
    /// failures fall back to `unknown` types.
    async fn load_custom_types(
        &self,
        team_id: &str,
    ) -> Result<HashMap<i64, String>, IntegrationError> {
        let url = self.url(&format!("/team/{team_id}/custom_item"));
        let result = async {
            let resp = send_with_retry(&self.config.retry, "clickup.custom_item", || {
                self.client.get(&url).header("Authorization", &self.token)
            })
            .await?;
            decode_json::<CustomItemsResponse>(resp).await
        }
        .await;

        match result {
            Ok(items) => {
                let types: HashMap<i64, String> = items
                    .custom_items
                    .into_iter()
                    .map(|item| (item.id, item.name))
                    .collect();
                tracing::debug!(
                    user_id = %self.user_id,
                    count = types.len(),
                    "Loaded custom task types"
                );
                Ok(types)
            }
            Err(e @ IntegrationError::Auth(_)) => Err(e),
            Err(e) => {
                tracing::warn!(
                    user_id = %self.user_id,
                    error = %e,
                    "Failed to load custom task types"
                );
                Ok(HashMap::new())
            }
        }
    }

    async fn fetch_page(&self, page: u32, done_after: i64) -> Result<TaskPage, IntegrationError> {
        let url = self.url(&format!("/list/{}/task", self.list_id));
        let query = [
            ("archived", "false".to_string()),
            ("include_closed", "true".to_string()),
            ("statuses[]", self.config.status.clone()),
            ("date_done_gt", done_after.to_string()),
            ("page", page.to_string()),
        ];
        let resp = send_with_retry(&self.config.retry, "clickup.tasks", || {
            self.client
                .get(&url)
                .header("Authorization", &self.token)
                .query(&query)
        })
        .await?;
        decode_json(resp).await
    }
}

#[async_trait::async_trait]
impl Integration for ClickUpIntegration {
    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn fetch_data(&self, window: &FetchWindow) -> Result<Vec<DataPoint>, IntegrationError> {
        if window.is_empty() {
            return Ok(Vec::new());
        }

        let done_after = window.aligned_start().timestamp_millis();
        let mut tasks = Vec::new();
        let mut page = 0;
        loop {
            let batch = self.fetch_page(page, done_after).await?;
            let count = batch.tasks.len();
            tasks.extend(batch.tasks);
            tracing::debug!(user_id = %self.user_id, page, count, "Fetched ClickUp task page");

            if count == 0 || batch.last_page.unwrap_or(true) {
                break;
            }
            page += 1;
            if page >= self.config.max_pages {
                tracing::warn!(
                    user_id = %self.user_id,
                    max_pages = self.config.max_pages,
                    "Page limit reached, remaining tasks skipped"
                );
                break;
            }
        }

        let points = aggregate_tasks(&tasks, &self.custom_types, window, Utc::now());
        tracing::debug!(
            user_id = %self.user_id,
            tasks = tasks.len(),
            days = points.len(),
            "Aggregated ClickUp tasks"
        );
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ms(y: i32, m: u32, d: u32, h: u32, min: u32) -> String {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
            .timestamp_millis()
            .to_string()
    }

    fn task(id: &str, start: String, done: String, type_id: Option<i64>, tags: &[&str]) -> Task {
        Task {
            id: id.to_string(),
            start_date: Some(start),
            date_done: Some(done),
            custom_item_id: type_id,
            tags: tags.iter().map(|t| Tag { name: t.to_string() }).collect(),
        }
    }

    fn window() -> FetchWindow {
        FetchWindow::new(
            Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_clickup_config_defaults() {
        let config: ClickUpConfig = serde_yaml::from_str("max_pages: 5").unwrap();
        assert_eq!(config.max_pages, 5);
        assert_eq!(config.status, DEFAULT_STATUS);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert!(config.validate().is_ok());

        let zero: ClickUpConfig = serde_yaml::from_str("max_pages: 0").unwrap();
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_split_by_day_at_midnight() {
        let start = Utc.with_ymd_and_hms(2024, 3, 5, 22, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 7, 1, 30, 0).unwrap();
        let pieces = split_by_day(start, end);

        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0].1, TimeDelta::hours(2));
        assert_eq!(pieces[1].1, TimeDelta::hours(24));
        assert_eq!(pieces[2].0, NaiveDate::from_ymd_opt(2024, 3, 7).unwrap());
        assert_eq!(pieces[2].1, TimeDelta::minutes(90));

        assert!(split_by_day(end, start).is_empty());
    }

    #[test]
    fn test_aggregate_tasks_per_day() {
        let types = HashMap::from([(1, "Deep Work".to_string()), (2, "Meeting".to_string())]);
        let tasks = vec![
            task("a", ms(2024, 3, 5, 9, 0), ms(2024, 3, 5, 10, 20), Some(1), &["rust"]),
            task("b", ms(2024, 3, 5, 13, 0), ms(2024, 3, 5, 13, 30), Some(2), &["sync", "rust"]),
            task("c", ms(2024, 3, 6, 8, 0), ms(2024, 3, 6, 9, 0), None, &[]),
            Task {
                date_done: None,
                ..task("d", ms(2024, 3, 6, 8, 0), String::new(), Some(1), &[])
            },
        ];

        let points = aggregate_tasks(&tasks, &types, &window(), Utc::now());
        assert_eq!(points.len(), 2);

        let day = &points[0];
        assert_eq!(day.date, NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        assert_eq!(day.value, 1.83);
        let attrs = day.attributes.as_ref().unwrap();
        assert_eq!(attrs["by_type"]["deep_work"], 1.33);
        assert_eq!(attrs["by_type"]["meeting"], 0.5);
        assert_eq!(attrs["tags"], serde_json::json!(["rust", "sync"]));

        assert_eq!(points[1].value, 1.0);
        assert_eq!(points[1].attributes.as_ref().unwrap()["by_type"]["unknown"], 1.0);
    }

    #[test]
    fn test_aggregate_drops_pieces_before_window() {
        let tasks = vec![task(
            "overnight",
            ms(2024, 3, 3, 23, 0),
            ms(2024, 3, 4, 2, 0),
            None,
            &[],
        )];
        let points = aggregate_tasks(&tasks, &HashMap::new(), &window(), Utc::now());
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].date, NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
        assert_eq!(points[0].value, 2.0);
    }

    #[test]
    fn test_normalize_type() {
        assert_eq!(normalize_type("Deep Work"), "deep_work");
        assert_eq!(normalize_type(" Bug "), "bug");
    }
}
