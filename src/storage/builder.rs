//! Storage builder and handles.
//!
//! Provides a builder pattern for constructing the storage layer
//! and the handles that expose each store contract.

use std::path::Path;
use std::sync::Arc;

use crate::storage::StorageError;
use crate::storage::db::{DEFAULT_MAX_CONNECTIONS, SqlitePool};
use crate::storage::schema::init_schema;
use crate::storage::sqlite_store::SqliteStore;
use crate::storage::store::{MetricsStore, OutcomeLog, RunStateStore};

/// Builder for constructing the storage layer.
pub struct StorageBuilder {
    url: String,
    max_connections: u32,
}

impl StorageBuilder {
    /// Create a new storage builder.
    ///
    /// Accepts either a `sqlite:` URL or a plain file path.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    /// Set the maximum number of pooled connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Connect, initialize the schema and return handles.
    pub async fn build(self) -> Result<StorageHandles, StorageError> {
        let url = normalize_url(&self.url);

        // Create parent directory if it doesn't exist
        if let Some(path) = file_path(&url)
            && let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Internal(format!(
                    "Failed to create database directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let pool = SqlitePool::connect(&url, self.max_connections).await?;
        init_schema(&pool).await?;

        let store = Arc::new(SqliteStore::new(pool.clone()));
        tracing::info!(url = %url, "Storage initialized");

        Ok(StorageHandles {
            metrics: store.clone(),
            run_state: store.clone(),
            outcomes: store,
            pool,
        })
    }
}

/// Shared handles to the store contracts.
pub struct StorageHandles {
    /// Idempotent metric value store.
    pub metrics: Arc<dyn MetricsStore>,
    /// Checkpoint store.
    pub run_state: Arc<dyn RunStateStore>,
    /// Per-item outcome audit log.
    pub outcomes: Arc<dyn OutcomeLog>,
    pool: SqlitePool,
}

impl StorageHandles {
    /// Close the connection pool, waiting for in-flight queries.
    pub async fn shutdown(self) -> Result<(), StorageError> {
        self.pool.close().await;
        Ok(())
    }
}

/// Turn a plain path into a create-if-missing SQLite URL.
fn normalize_url(url: &str) -> String {
    if url.starts_with("sqlite:") {
        url.to_string()
    } else {
        format!("sqlite:{url}?mode=rwc")
    }
}

/// Filesystem path of a file-backed SQLite URL.
fn file_path(url: &str) -> Option<&Path> {
    let rest = url.strip_prefix("sqlite:")?;
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let path = rest.split('?').next()?;
    if path.is_empty() || path.contains(":memory:") {
        return None;
    }
    Some(Path::new(path))
}
