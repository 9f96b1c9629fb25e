//! Database abstraction layer.
//!
//! Currently supports SQLite through sqlx.
//!
//! # Example
//!
//! ```ignore
//! let pool = SqlitePool::connect("sqlite:data/metric-sync.db?mode=rwc", 5).await?;
//! let row = sqlx::query("SELECT 1").fetch_one(pool.inner()).await?;
//! ```

mod sqlite;

pub use sqlite::{DEFAULT_MAX_CONNECTIONS, SqlitePool};
