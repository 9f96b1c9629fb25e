//! Open-Meteo historical daily weather.
//!
//! No credential. One location per deployment; the value stored for a day is
//! its maximum temperature, the rest of the daily set goes into attributes.
//!
//! The archive lags real time by a few days and answers `null` for days it
//! has not published yet. Those days are skipped rather than stored, so an
//! incremental run past them leaves a gap; rerun with an explicit
//! `start_date` to fill it once the archive catches up.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::http::{RetryPolicy, build_client, decode_json, send_with_retry};
use super::{DataPoint, FetchWindow, Integration, IntegrationError, IntegrationFactory};
use crate::secrets::SecretSource;
use crate::storage::DATE_FORMAT;

/// Provider name.
pub const PROVIDER: &str = "open_meteo";

const DEFAULT_BASE_URL: &str = "https://archive-api.open-meteo.com/v1";
const DEFAULT_LATITUDE: f64 = 51.05306;
const DEFAULT_LONGITUDE: f64 = -114.07139;
const DEFAULT_TIMEZONE: &str = "America/Edmonton";

/// Default request timeout (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Daily variables requested, paired with their attribute names.
const DAILY_FIELDS: [(&str, &str); 7] = [
    ("temperature_2m_max", "temp_max"),
    ("temperature_2m_min", "temp_min"),
    ("relative_humidity_2m_mean", "humidity_mean"),
    ("surface_pressure_mean", "pressure_mean"),
    ("precipitation_sum", "precipitation"),
    ("wind_speed_10m_max", "wind_max"),
    ("sunshine_duration", "sunshine_duration"),
];

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_latitude() -> f64 {
    DEFAULT_LATITUDE
}

fn default_longitude() -> f64 {
    DEFAULT_LONGITUDE
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

/// Configuration for the Open-Meteo integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenMeteoConfig {
    /// Archive API root (default: "https://archive-api.open-meteo.com/v1").
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_latitude")]
    pub latitude: f64,
    #[serde(default = "default_longitude")]
    pub longitude: f64,
    /// IANA timezone the daily aggregates are computed in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Request timeout (default: 30s).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for OpenMeteoConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            latitude: DEFAULT_LATITUDE,
            longitude: DEFAULT_LONGITUDE,
            timezone: default_timezone(),
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

impl OpenMeteoConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_location(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = latitude;
        self.longitude = longitude;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(format!("latitude out of range: {}", self.latitude));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(format!("longitude out of range: {}", self.longitude));
        }
        if self.base_url.is_empty() {
            return Err("base_url cannot be empty".to_string());
        }
        if self.timeout.is_zero() {
            return Err("timeout must be positive".to_string());
        }
        self.retry.validate()
    }
}

#[derive(Debug, Default, Deserialize)]
struct ArchiveResponse {
    #[serde(default)]
    daily: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Value of `field` at row `index`, `None` if missing or null.
fn daily_value(
    daily: &serde_json::Map<String, serde_json::Value>,
    field: &str,
    index: usize,
) -> Option<f64> {
    daily
        .get(field)
        .and_then(|column| column.get(index))
        .and_then(serde_json::Value::as_f64)
}

/// Turn the columnar `daily` block into one point per day inside `window`.
fn parse_archive(
    response: &ArchiveResponse,
    window: &FetchWindow,
    captured_at: DateTime<Utc>,
) -> Result<Vec<DataPoint>, IntegrationError> {
    let Some(daily) = response.daily.as_ref() else {
        return Ok(Vec::new());
    };
    let times: &[serde_json::Value] = match daily.get("time") {
        Some(serde_json::Value::Array(times)) => times.as_slice(),
        Some(_) => {
            return Err(IntegrationError::InvalidResponse(
                "daily.time is not an array".to_string(),
            ));
        }
        None => &[],
    };

    let mut points = Vec::with_capacity(times.len());
    for (index, time) in times.iter().enumerate() {
        let raw = time.as_str().unwrap_or_default();
        let date = NaiveDate::parse_from_str(raw, DATE_FORMAT)
            .map_err(|_| IntegrationError::InvalidResponse(format!("invalid daily date '{raw}'")))?;
        if !window.contains_day(date) {
            continue;
        }

        let Some(temp_max) = daily_value(daily, DAILY_FIELDS[0].0, index) else {
            tracing::debug!(%date, "Daily maximum not published yet, skipping day");
            continue;
        };

        // Secondary values that are missing read as 0.
        let mut attributes = serde_json::Map::new();
        for (field, name) in DAILY_FIELDS {
            let value = daily_value(daily, field, index).unwrap_or(0.0);
            attributes.insert(name.to_string(), value.into());
        }

        points.push(
            DataPoint::new(date, temp_max, captured_at)
                .with_attributes(serde_json::Value::Object(attributes)),
        );
    }
    Ok(points)
}

/// Builds [`OpenMeteoIntegration`]s.
#[derive(Debug, Clone)]
pub struct OpenMeteoFactory {
    config: OpenMeteoConfig,
    client: Client,
}

impl OpenMeteoFactory {
    pub fn new(config: OpenMeteoConfig) -> Result<Self, IntegrationError> {
        let client = build_client(config.timeout)?;
        Ok(Self { config, client })
    }
}

#[async_trait::async_trait]
impl IntegrationFactory for OpenMeteoFactory {
    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn connect(
        &self,
        user_id: &str,
        _secrets: &dyn SecretSource,
    ) -> Result<Box<dyn Integration>, IntegrationError> {
        Ok(Box::new(OpenMeteoIntegration {
            config: self.config.clone(),
            client: self.client.clone(),
            user_id: user_id.to_string(),
        }))
    }
}

/// Open-Meteo client for one user.
#[derive(Debug)]
pub struct OpenMeteoIntegration {
    config: OpenMeteoConfig,
    client: Client,
    user_id: String,
}

#[async_trait::async_trait]
impl Integration for OpenMeteoIntegration {
    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn fetch_data(&self, window: &FetchWindow) -> Result<Vec<DataPoint>, IntegrationError> {
        if window.is_empty() {
            return Ok(Vec::new());
        }

        let start = window.first_day().format(DATE_FORMAT).to_string();
        let end = window.last_day().format(DATE_FORMAT).to_string();
        let daily = DAILY_FIELDS.map(|(field, _)| field).join(",");
        let url = format!("{}/archive", self.config.base_url.trim_end_matches('/'));
        let query = [
            ("latitude", self.config.latitude.to_string()),
            ("longitude", self.config.longitude.to_string()),
            ("start_date", start),
            ("end_date", end),
            ("daily", daily),
            ("timezone", self.config.timezone.clone()),
        ];

        tracing::debug!(
            user_id = %self.user_id,
            start_date = %window.first_day(),
            end_date = %window.last_day(),
            "Fetching Open-Meteo weather"
        );

        let resp = send_with_retry(&self.config.retry, "open_meteo.archive", || {
            self.client.get(&url).query(&query)
        })
        .await?;
        let payload: ArchiveResponse = decode_json(resp).await?;

        let points = parse_archive(&payload, window, Utc::now())?;
        tracing::debug!(user_id = %self.user_id, count = points.len(), "Fetched weather");
        Ok(points)
    }
}
