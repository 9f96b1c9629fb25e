//! Google Fit daily step counts.
//!
//! Credential: `google_fit/<user>/token` holding the OAuth JSON
//! `{token, refresh_token?, token_uri?, client_id?, client_secret?}`. An
//! expired access token is refreshed once per fetch when a refresh token is
//! present.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::http::{RetryPolicy, build_client, decode_json, send_with_retry};
use super::{DataPoint, FetchWindow, Integration, IntegrationError, IntegrationFactory};
use crate::secrets::{SecretSource, require_secret};

/// Provider name and credential namespace.
pub const PROVIDER: &str = "google_fit";

/// Credential key holding the OAuth JSON.
pub const TOKEN_KEY: &str = "token";

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/fitness/v1";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_DATA_TYPE: &str = "com.google.step_count.delta";
const DEFAULT_DATA_SOURCE: &str =
    "derived:com.google.step_count.delta:com.google.android.gms:estimated_steps";
const DAY_MILLIS: i64 = 86_400_000;

/// Default request timeout (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

fn default_data_source() -> String {
    DEFAULT_DATA_SOURCE.to_string()
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

/// Configuration for the Google Fit integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleFitConfig {
    /// Fitness API root (default: "https://www.googleapis.com/fitness/v1").
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Token endpoint used when the credential has none.
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    /// Aggregated data source id.
    #[serde(default = "default_data_source")]
    pub data_source_id: String,
    /// Request timeout (default: 30s).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for GoogleFitConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token_uri: default_token_uri(),
            data_source_id: default_data_source(),
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

impl GoogleFitConfig {
    /// Point the integration at another API root and token endpoint.
    pub fn with_base_url(
        mut self,
        base_url: impl Into<String>,
        token_uri: impl Into<String>,
    ) -> Self {
        self.base_url = base_url.into();
        self.token_uri = token_uri.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.is_empty() || self.token_uri.is_empty() {
            return Err("base_url and token_uri cannot be empty".to_string());
        }
        if self.timeout.is_zero() {
            return Err("timeout must be positive".to_string());
        }
        self.retry.validate()
    }
}

/// Stored OAuth credential.
#[derive(Clone, Deserialize)]
struct OAuthCredential {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    client_secret: Option<String>,
}

impl OAuthCredential {
    fn parse(raw: &str) -> Result<Self, IntegrationError> {
        let mut cred: Self = serde_json::from_str(raw)
            .map_err(|e| IntegrationError::Auth(format!("malformed OAuth credential: {e}")))?;
        // Treat empty strings as absent.
        for field in [
            &mut cred.token,
            &mut cred.refresh_token,
            &mut cred.token_uri,
            &mut cred.client_id,
            &mut cred.client_secret,
        ] {
            if field.as_deref().is_some_and(str::is_empty) {
                *field = None;
            }
        }
        if cred.token.is_none() && cred.refresh_token.is_none() {
            return Err(IntegrationError::Auth(
                "OAuth credential has neither token nor refresh_token".to_string(),
            ));
        }
        Ok(cred)
    }

    fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Default, Deserialize)]
struct AggregateResponse {
    #[serde(default)]
    bucket: Vec<Bucket>,
}

#[derive(Debug, Deserialize)]
struct Bucket {
    #[serde(default)]
    dataset: Vec<Dataset>,
}

#[derive(Debug, Deserialize)]
struct Dataset {
    #[serde(default)]
    point: Vec<Point>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Point {
    start_time_nanos: String,
    #[serde(default)]
    value: Vec<PointValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PointValue {
    #[serde(default)]
    int_val: Option<i64>,
}

/// Sum step values per UTC day, keeping only days inside `window`.
fn parse_aggregate(
    response: &AggregateResponse,
    window: &FetchWindow,
    captured_at: DateTime<Utc>,
) -> Result<Vec<DataPoint>, IntegrationError> {
    let mut per_day: BTreeMap<NaiveDate, i64> = BTreeMap::new();

    for point in response
        .bucket
        .iter()
        .flat_map(|b| &b.dataset)
        .flat_map(|d| &d.point)
    {
        if point.value.is_empty() {
            continue;
        }
        let nanos: i64 = point.start_time_nanos.parse().map_err(|_| {
            IntegrationError::InvalidResponse(format!(
                "invalid startTimeNanos '{}'",
                point.start_time_nanos
            ))
        })?;
        let date = DateTime::from_timestamp_nanos(nanos).date_naive();
        if !window.contains_day(date) {
            continue;
        }
        let steps: i64 = point.value.iter().filter_map(|v| v.int_val).sum();
        *per_day.entry(date).or_default() += steps;
    }

    Ok(per_day
        .into_iter()
        .map(|(date, steps)| DataPoint::new(date, steps as f64, captured_at))
        .collect())
}

/// Builds [`GoogleFitIntegration`]s.
#[derive(Debug, Clone)]
pub struct GoogleFitFactory {
    config: GoogleFitConfig,
    client: Client,
}

impl GoogleFitFactory {
    pub fn new(config: GoogleFitConfig) -> Result<Self, IntegrationError> {
        let client = build_client(config.timeout)?;
        Ok(Self { config, client })
    }
}

#[async_trait::async_trait]
impl IntegrationFactory for GoogleFitFactory {
    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn connect(
        &self,
        user_id: &str,
        secrets: &dyn SecretSource,
    ) -> Result<Box<dyn Integration>, IntegrationError> {
        let raw = require_secret(secrets, PROVIDER, user_id, TOKEN_KEY).await?;
        let credential = OAuthCredential::parse(&raw)?;
        tracing::debug!(user_id, provider = PROVIDER, "Loaded OAuth credential");

        Ok(Box::new(GoogleFitIntegration {
            config: self.config.clone(),
            client: self.client.clone(),
            access_token: Mutex::new(credential.token.clone()),
            credential,
            user_id: user_id.to_string(),
        }))
    }
}

/// Google Fit client for one user.
pub struct GoogleFitIntegration {
    config: GoogleFitConfig,
    client: Client,
    credential: OAuthCredential,
    access_token: Mutex<Option<String>>,
    user_id: String,
}

impl std::fmt::Debug for GoogleFitIntegration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleFitIntegration")
            .field("user_id", &self.user_id)
            .field("base_url", &self.config.base_url)
            .finish_non_exhaustive()
    }
}

impl GoogleFitIntegration {
    async fn refresh(&self) -> Result<String, IntegrationError> {
        let Some(refresh_token) = self.credential.refresh_token.as_deref() else {
            return Err(IntegrationError::Auth(
                "access token rejected and no refresh_token available".to_string(),
            ));
        };
        let token_uri = self
            .credential
            .token_uri
            .as_deref()
            .unwrap_or(&self.config.token_uri);

        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        if let Some(id) = self.credential.client_id.as_deref() {
            form.push(("client_id", id));
        }
        if let Some(secret) = self.credential.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        let resp = send_with_retry(&self.config.retry, "google_fit.refresh", || {
            self.client.post(token_uri).form(&form)
        })
        .await?;

        // The token endpoint answers 400 invalid_grant for revoked refresh tokens.
        if resp.status().is_client_error() {
            return Err(IntegrationError::Auth(format!(
                "token refresh rejected with HTTP {}",
                resp.status()
            )));
        }
        let token: TokenResponse = decode_json(resp).await?;

        tracing::info!(user_id = %self.user_id, "Refreshed Google Fit access token");
        *self.access_token.lock().await = Some(token.access_token.clone());
        Ok(token.access_token)
    }

    async fn aggregate(
        &self,
        token: &str,
        body: &serde_json::Value,
    ) -> Result<Response, IntegrationError> {
        let url = format!(
            "{}/users/me/dataset:aggregate",
            self.config.base_url.trim_end_matches('/')
        );
        send_with_retry(&self.config.retry, "google_fit.aggregate", || {
            self.client.post(&url).bearer_auth(token).json(body)
        })
        .await
    }
}

#[async_trait::async_trait]
impl Integration for GoogleFitIntegration {
    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn fetch_data(&self, window: &FetchWindow) -> Result<Vec<DataPoint>, IntegrationError> {
        if window.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "aggregateBy": [{
                "dataTypeName": DEFAULT_DATA_TYPE,
                "dataSourceId": self.config.data_source_id,
            }],
            "bucketByTime": { "durationMillis": DAY_MILLIS },
            "startTimeMillis": window.aligned_start().timestamp_millis(),
            "endTimeMillis": window.until.timestamp_millis(),
        });

        tracing::debug!(
            user_id = %self.user_id,
            since = %window.since,
            until = %window.until,
            "Fetching Google Fit steps"
        );

        let cached = self.access_token.lock().await.clone();
        let token = match cached {
            Some(token) => token,
            None => self.refresh().await?,
        };

        let mut resp = self.aggregate(&token, &body).await?;
        if resp.status() == StatusCode::UNAUTHORIZED && self.credential.can_refresh() {
            tracing::debug!(user_id = %self.user_id, "Access token rejected, refreshing");
            let token = self.refresh().await?;
            resp = self.aggregate(&token, &body).await?;
        }

        let payload: AggregateResponse = decode_json(resp).await?;
        let points = parse_aggregate(&payload, window, Utc::now())?;
        tracing::debug!(user_id = %self.user_id, count = points.len(), "Fetched Google Fit steps");
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn window() -> FetchWindow {
        FetchWindow::new(
            Utc.with_ymd_and_hms(2024, 3, 3, 12, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap(),
        )
    }

    fn nanos(y: i32, m: u32, d: u32) -> String {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0)
            .unwrap()
            .timestamp_nanos_opt()
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_google_fit_config_defaults() {
        let config: GoogleFitConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.token_uri, DEFAULT_TOKEN_URI);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_credential() {
        let cred = OAuthCredential::parse(r#"{"token":"abc","refresh_token":""}"#).unwrap();
        assert_eq!(cred.token.as_deref(), Some("abc"));
        assert!(!cred.can_refresh());

        let err = OAuthCredential::parse(r#"{"client_id":"x"}"#).err().unwrap();
        assert!(matches!(err, IntegrationError::Auth(_)));

        let err = OAuthCredential::parse("not json").err().unwrap();
        assert!(matches!(err, IntegrationError::Auth(_)));
    }

    #[test]
    fn test_parse_aggregate_sums_per_day() {
        let response: AggregateResponse = serde_json::from_value(serde_json::json!({
            "bucket": [
                {"dataset": [{"point": [{
                    "startTimeNanos": nanos(2024, 3, 4),
                    "value": [{"intVal": 1200}, {"intVal": 300}]
                }]}]},
                {"dataset": [{"point": [{
                    "startTimeNanos": nanos(2024, 3, 5),
                    "value": []
                }]}]},
                {"dataset": [{"point": [{
                    "startTimeNanos": nanos(2024, 3, 6),
                    "value": [{"intVal": 8000}]
                }]}]}
            ]
        }))
        .unwrap();

        let captured = Utc::now();
        let points = parse_aggregate(&response, &window(), captured).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].date, NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
        assert_eq!(points[0].value, 1500.0);
        assert_eq!(points[1].value, 8000.0);
        assert_eq!(points[1].timestamp, captured);
    }

    #[test]
    fn test_parse_aggregate_drops_days_before_window() {
        let response: AggregateResponse = serde_json::from_value(serde_json::json!({
            "bucket": [{"dataset": [{"point": [{
                "startTimeNanos": nanos(2024, 3, 1),
                "value": [{"intVal": 10}]
            }]}]}]
        }))
        .unwrap();
        assert!(parse_aggregate(&response, &window(), Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn test_parse_aggregate_rejects_bad_timestamp() {
        let response: AggregateResponse = serde_json::from_value(serde_json::json!({
            "bucket": [{"dataset": [{"point": [{
                "startTimeNanos": "yesterday",
                "value": [{"intVal": 10}]
            }]}]}]
        }))
        .unwrap();
        let err = parse_aggregate(&response, &window(), Utc::now()).unwrap_err();
        assert!(matches!(err, IntegrationError::InvalidResponse(_)));
    }
}
