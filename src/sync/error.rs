//! Item-level error taxonomy.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

use crate::integration::IntegrationError;
use crate::storage::StorageError;

/// Failure classification for one work item.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Unknown metric, unregistered integration, invalid payload, rejected request.
    Configuration,
    /// Missing, expired, or invalid credential.
    Auth,
    /// Timeout, throttling, upstream 5xx, undecodable response.
    TransientFetch,
    /// Store read/write failure or store timeout.
    Persistence,
}

impl ErrorKind {
    /// Report status for this kind.
    pub fn status(self) -> OutcomeStatus {
        match self {
            Self::Configuration | Self::Auth => OutcomeStatus::FatalFailure,
            Self::TransientFetch | Self::Persistence => OutcomeStatus::TransientFailure,
        }
    }
}

/// Final status of one work item.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    /// Expected to clear on a later scheduled run.
    TransientFailure,
    /// Needs operator action (config fix or new credential).
    FatalFailure,
}

impl OutcomeStatus {
    pub fn is_failure(self) -> bool {
        self != Self::Success
    }
}

/// Error that ended one work item.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("transient fetch error: {0}")]
    TransientFetch(String),

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Auth(_) => ErrorKind::Auth,
            Self::TransientFetch(_) => ErrorKind::TransientFetch,
            Self::Persistence(_) => ErrorKind::Persistence,
        }
    }

    pub fn status(&self) -> OutcomeStatus {
        self.kind().status()
    }

    /// Message without the kind prefix.
    pub fn detail(&self) -> &str {
        match self {
            Self::Configuration(msg)
            | Self::Auth(msg)
            | Self::TransientFetch(msg)
            | Self::Persistence(msg) => msg,
        }
    }
}

impl From<IntegrationError> for SyncError {
    fn from(err: IntegrationError) -> Self {
        match err {
            IntegrationError::Auth(_) => Self::Auth(err.to_string()),
            IntegrationError::Config(_) | IntegrationError::UnknownMetric(_) => {
                Self::Configuration(err.to_string())
            }
            IntegrationError::RateLimited(_)
            | IntegrationError::Unavailable(_)
            | IntegrationError::Timeout(_)
            | IntegrationError::InvalidResponse(_) => Self::TransientFetch(err.to_string()),
        }
    }
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        Self::Persistence(err.to_string())
    }
}
