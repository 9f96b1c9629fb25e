//! Sync Layer
//!
//! Orchestrates incremental collection for every (user, metric) pair.
//!
//! # Architecture
//!
//! - [`SyncEngine`]: Plans work items and runs them on a bounded pool
//! - [`RunFilter`]: Invocation payload narrowing users, metrics, and dates
//! - [`Report`]: Ordered per-item outcomes of one run
//! - [`SyncError`]: Item failure, classified by [`ErrorKind`]
//!
//! # Checkpoint discipline
//!
//! A pair's checkpoint moves to the run instant only after its records were
//! persisted (or there were none). Any failure leaves it untouched, so the
//! next run fetches the same window again; the idempotent upsert makes that
//! re-delivery harmless.

mod engine;
mod error;
mod filter;
mod report;

pub use engine::{
    DEFAULT_CONCURRENCY, DEFAULT_FETCH_TIMEOUT, DEFAULT_STORE_TIMEOUT, DEFAULT_USER, SyncEngine,
    SyncOptions, WILDCARD,
};
pub use error::{ErrorKind, OutcomeStatus, SyncError};
pub use filter::RunFilter;
pub use report::{ItemOutcome, Report, ReportSummary};
