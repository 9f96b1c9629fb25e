//! Shared HTTP plumbing for provider integrations.
//!
//! Requests go through [`send_with_retry`], which retries throttling, 5xx, and
//! transport failures with exponential backoff (honoring `Retry-After`).
//! Everything else is handed back to the caller, which turns it into a typed
//! result with [`decode_json`] or [`classify_status`].

use std::time::Duration;

use chrono::Utc;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::IntegrationError;

/// Default number of attempts per request.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default first backoff delay (1 second).
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default backoff ceiling (30 seconds).
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Longest body excerpt carried in error messages.
const ERROR_BODY_LIMIT: usize = 200;

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_base_delay() -> Duration {
    DEFAULT_BASE_DELAY
}

fn default_max_delay() -> Duration {
    DEFAULT_MAX_DELAY
}

/// Retry settings for upstream requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles afterwards (default: 1s).
    #[serde(default = "default_base_delay", with = "humantime_serde")]
    pub base_delay: Duration,
    /// Upper bound for any single delay, including `Retry-After` (default: 30s).
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Policy with custom delays.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Backoff before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry max_attempts must be positive".to_string());
        }
        if self.base_delay > self.max_delay {
            return Err("retry base_delay cannot exceed max_delay".to_string());
        }
        Ok(())
    }
}

/// Build a client with a per-request timeout.
pub fn build_client(timeout: Duration) -> Result<Client, IntegrationError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("metric-sync/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| IntegrationError::Config(format!("failed to create HTTP client: {e}")))
}

/// Map a non-success status to an error kind.
///
/// 401/403/404 mean the credential or upstream account is unusable, 429 and
/// 5xx are worth retrying later, and any other 4xx means the request itself
/// is wrong.
pub fn classify_status(status: StatusCode, body: &str) -> IntegrationError {
    let excerpt: String = body.chars().take(ERROR_BODY_LIMIT).collect();
    let msg = if excerpt.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {excerpt}")
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
            IntegrationError::Auth(msg)
        }
        StatusCode::TOO_MANY_REQUESTS => IntegrationError::RateLimited(msg),
        StatusCode::REQUEST_TIMEOUT => IntegrationError::Timeout(msg),
        s if s.is_server_error() => IntegrationError::Unavailable(msg),
        _ => IntegrationError::Config(msg),
    }
}

/// Map a transport failure to an error kind.
pub fn classify_transport(err: &reqwest::Error) -> IntegrationError {
    if err.is_timeout() {
        IntegrationError::Timeout(err.to_string())
    } else if err.is_builder() {
        IntegrationError::Config(err.to_string())
    } else if err.is_decode() {
        IntegrationError::InvalidResponse(err.to_string())
    } else {
        IntegrationError::Unavailable(err.to_string())
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// Parse `Retry-After` as delta-seconds or an HTTP date.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = at.with_timezone(&Utc) - Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

/// Send a request, retrying transient failures.
///
/// `build` is called once per attempt. Returns the first response that is
/// either successful or not worth retrying; the caller decides what a
/// non-success status means for it.
pub async fn send_with_retry<F>(
    policy: &RetryPolicy,
    label: &str,
    mut build: F,
) -> Result<Response, IntegrationError>
where
    F: FnMut() -> RequestBuilder,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let delay = match build().send().await {
            Ok(resp) => {
                let status = resp.status();
                if !is_retryable_status(status) || attempt >= max_attempts {
                    return Ok(resp);
                }
                let delay = retry_after(resp.headers())
                    .unwrap_or_else(|| policy.backoff(attempt))
                    .min(policy.max_delay);
                tracing::warn!(
                    request = label,
                    status = status.as_u16(),
                    attempt,
                    delay = ?delay,
                    "Retrying throttled or failed request"
                );
                delay
            }
            Err(e) => {
                let err = classify_transport(&e);
                if !err.is_transient() || attempt >= max_attempts {
                    return Err(err);
                }
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    request = label,
                    error = %e,
                    attempt,
                    delay = ?delay,
                    "Retrying request after transport error"
                );
                delay
            }
        };

        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Check the status and decode a JSON body.
pub async fn decode_json<T: DeserializeOwned>(resp: Response) -> Result<T, IntegrationError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(classify_status(status, &body));
    }

    let bytes = resp.bytes().await.map_err(|e| classify_transport(&e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| IntegrationError::InvalidResponse(format!("failed to decode body: {e}")))
}
