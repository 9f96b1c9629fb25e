//! Database schema definitions.

use crate::storage::StorageError;
use crate::storage::db::SqlitePool;

/// Metric values, partitioned by user and sorted by `"{date}#{metric_type}"`.
///
/// The primary key is the record identity, so `ON CONFLICT` turns every
/// write into an idempotent upsert.
pub const METRICS_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS metrics (
    user_id      TEXT NOT NULL,
    metric_key   TEXT NOT NULL,
    metric_type  TEXT NOT NULL,
    date         TEXT NOT NULL,
    value        REAL NOT NULL,
    attributes   TEXT,
    captured_at  INTEGER NOT NULL,
    PRIMARY KEY (user_id, metric_key)
);
CREATE INDEX IF NOT EXISTS metrics_type_date ON metrics (metric_type, date);
"#;

/// Sync checkpoints, one row per `(user_id, metric_type)`.
///
/// `last_run_time` holds Unix microseconds.
pub const RUN_STATE_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS run_state (
    user_id        TEXT NOT NULL,
    metric_type    TEXT NOT NULL,
    last_run_time  INTEGER NOT NULL,
    updated_at     INTEGER NOT NULL,
    PRIMARY KEY (user_id, metric_type)
);
"#;

/// Per-item outcome audit log.
pub const SYNC_OUTCOMES_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS sync_outcomes (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id        TEXT NOT NULL,
    user_id       TEXT NOT NULL,
    metric_type   TEXT NOT NULL,
    status        TEXT NOT NULL,
    error_kind    TEXT,
    record_count  INTEGER NOT NULL DEFAULT 0,
    error_detail  TEXT,
    window_start  INTEGER,
    window_end    INTEGER,
    recorded_at   INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS sync_outcomes_run ON sync_outcomes (run_id);
"#;

/// Initialize the database schema.
///
/// Creates all tables and indexes if they don't exist.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), StorageError> {
    for ddl in [
        METRICS_TABLE_DDL,
        RUN_STATE_TABLE_DDL,
        SYNC_OUTCOMES_TABLE_DDL,
    ] {
        sqlx::raw_sql(ddl).execute(pool.inner()).await?;
    }

    tracing::info!("Database schema initialized");
    Ok(())
}
