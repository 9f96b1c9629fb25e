//! Incremental sync engine.
//!
//! One run enumerates (user, metric) work items and processes each on a
//! bounded worker pool:
//!
//! 1. Read the checkpoint; fall back to the backfill window if absent.
//! 2. Connect the integration with the user's credentials and fetch `(since, now]`.
//! 3. Upsert the fetched records.
//! 4. Advance the checkpoint to `now`, only after step 3 is acknowledged.
//!
//! A failing item is classified and reported but never stops the others.
//! The engine keeps no state between runs.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;
use uuid::Uuid;

use super::{ItemOutcome, Report, RunFilter, SyncError};
use crate::integration::{DEFAULT_BACKFILL_DAYS, FetchWindow, IntegrationRegistry};
use crate::secrets::SecretSource;
use crate::storage::{MetricRecord, MetricsStore, OutcomeLog, RunStateStore, StorageHandles};

/// Default worker pool size.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default timeout for connecting and fetching one item (60 seconds).
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Default timeout for each store call (10 seconds).
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// User processed when no user is configured or checkpointed.
pub const DEFAULT_USER: &str = "default";

/// Placeholder user/metric for outcomes not tied to a single item.
pub const WILDCARD: &str = "*";

/// Engine tuning and user enumeration.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Maximum items processed concurrently.
    pub concurrency: usize,
    /// Bound on connect + fetch for one item.
    pub fetch_timeout: Duration,
    /// Bound on each store call.
    pub store_timeout: Duration,
    /// Overall run budget; items still running when it elapses are dropped.
    pub run_deadline: Option<Duration>,
    /// Days fetched for a pair with no checkpoint.
    pub backfill_days: u32,
    /// Users always processed, in addition to checkpointed ones.
    pub users: Vec<String>,
    /// User processed when nobody else is known.
    pub default_user: String,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            run_deadline: None,
            backfill_days: DEFAULT_BACKFILL_DAYS,
            users: Vec::new(),
            default_user: DEFAULT_USER.to_string(),
        }
    }
}

impl SyncOptions {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_timeouts(mut self, fetch_timeout: Duration, store_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self.store_timeout = store_timeout;
        self
    }

    pub fn with_run_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.run_deadline = deadline;
        self
    }

    pub fn with_users<I, S>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.users = users.into_iter().map(Into::into).collect();
        self
    }
}

/// Await `fut` for at most `limit`, mapping both failure paths to `SyncError`.
async fn bounded<T, E, F>(
    limit: Duration,
    operation: &str,
    on_timeout: fn(String) -> SyncError,
    fut: F,
) -> Result<T, SyncError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<SyncError>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(on_timeout(format!("{operation} timed out after {limit:?}"))),
    }
}

/// Store a finished task's outcome in its slot; panics and cancellations leave it empty.
fn collect_joined(
    slots: &mut [Option<ItemOutcome>],
    joined: Result<(usize, ItemOutcome), tokio::task::JoinError>,
) {
    match joined {
        Ok((index, outcome)) => slots[index] = Some(outcome),
        Err(e) if e.is_panic() => tracing::error!(error = %e, "Sync task panicked"),
        Err(e) => tracing::debug!(error = %e, "Sync task cancelled"),
    }
}

/// Abort unfinished tasks, keeping outcomes of tasks that already finished.
async fn drain_aborted(
    tasks: &mut JoinSet<(usize, ItemOutcome)>,
    slots: &mut [Option<ItemOutcome>],
) {
    tasks.abort_all();
    while let Some(joined) = tasks.join_next().await {
        collect_joined(slots, joined);
    }
}

/// Processes single work items. Cheap to clone into worker tasks.
#[derive(Clone)]
struct ItemRunner {
    registry: Arc<IntegrationRegistry>,
    secrets: Arc<dyn SecretSource>,
    metrics: Arc<dyn MetricsStore>,
    run_state: Arc<dyn RunStateStore>,
    options: Arc<SyncOptions>,
}

impl ItemRunner {
    async fn run_item(
        &self,
        user_id: String,
        metric: String,
        filter: &RunFilter,
        now: DateTime<Utc>,
    ) -> ItemOutcome {
        let started = std::time::Instant::now();

        let outcome = match self.resolve_window(&user_id, &metric, filter, now).await {
            Err(e) => ItemOutcome::failure(&user_id, &metric, None, &e),
            Ok(window) => match self
                .sync_window(&user_id, &metric, &window, filter.is_manual())
                .await
            {
                Ok((count, advanced)) => {
                    ItemOutcome::success(&user_id, &metric, &window, count, advanced)
                }
                Err(e) => ItemOutcome::failure(&user_id, &metric, Some(&window), &e),
            },
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let error_kind = outcome.error_kind.map(|kind| kind.to_string());
        let error_detail = outcome.error_detail.as_deref();
        if outcome.is_failure() {
            tracing::warn!(
                user_id = %outcome.user_id,
                metric = %outcome.metric,
                status = %outcome.status,
                record_count = outcome.record_count,
                error_kind = error_kind.as_deref(),
                error_detail,
                elapsed_ms,
                "Sync item failed"
            );
        } else {
            tracing::info!(
                user_id = %outcome.user_id,
                metric = %outcome.metric,
                status = %outcome.status,
                record_count = outcome.record_count,
                checkpoint_advanced = outcome.checkpoint_advanced,
                elapsed_ms,
                "Sync item completed"
            );
        }
        outcome
    }

    async fn resolve_window(
        &self,
        user_id: &str,
        metric: &str,
        filter: &RunFilter,
        now: DateTime<Utc>,
    ) -> Result<FetchWindow, SyncError> {
        let checkpoint = if filter.start_date.is_some() {
            None
        } else {
            bounded(
                self.options.store_timeout,
                "run_state.get",
                SyncError::Persistence,
                self.run_state.get(user_id, metric),
            )
            .await?
        };
        if checkpoint.is_none() && filter.start_date.is_none() {
            tracing::debug!(
                user_id,
                metric,
                days = self.options.backfill_days,
                "No checkpoint, backfilling"
            );
        }
        Ok(filter.window(checkpoint, now, self.options.backfill_days))
    }

    /// Returns the stored record count and whether the checkpoint moved.
    async fn sync_window(
        &self,
        user_id: &str,
        metric: &str,
        window: &FetchWindow,
        manual: bool,
    ) -> Result<(u64, bool), SyncError> {
        let factory = self.registry.resolve(metric)?;

        if window.is_empty() {
            tracing::debug!(
                user_id,
                metric,
                since = %window.since,
                "Window is empty, nothing to fetch"
            );
            return Ok((0, false));
        }

        let points = bounded(
            self.options.fetch_timeout,
            "fetch",
            SyncError::TransientFetch,
            async {
                let integration = factory.connect(user_id, self.secrets.as_ref()).await?;
                integration.fetch_data(window).await
            },
        )
        .await?;

        let fetched = points.len();
        let records: Vec<MetricRecord> = points
            .into_iter()
            .filter(|p| p.value.is_finite() && window.contains_day(p.date))
            .map(|p| p.into_record(user_id, metric))
            .collect();
        if records.len() < fetched {
            tracing::warn!(
                user_id,
                metric,
                dropped = fetched - records.len(),
                "Dropped points outside the window or with non-finite values"
            );
        }

        if !records.is_empty() {
            bounded(
                self.options.store_timeout,
                "metrics.put_batch",
                SyncError::Persistence,
                self.metrics.put_batch(&records),
            )
            .await?;
        }

        if manual {
            return Ok((records.len() as u64, false));
        }

        bounded(
            self.options.store_timeout,
            "run_state.set",
            SyncError::Persistence,
            self.run_state.set(user_id, metric, window.until),
        )
        .await?;

        Ok((records.len() as u64, true))
    }
}

/// Drives sync runs over every known (user, metric) pair.
pub struct SyncEngine {
    runner: ItemRunner,
    outcomes: Option<Arc<dyn OutcomeLog>>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("registry", &self.runner.registry)
            .field("options", &self.runner.options)
            .field("outcome_log", &self.outcomes.is_some())
            .finish()
    }
}

impl SyncEngine {
    pub fn new(
        registry: Arc<IntegrationRegistry>,
        secrets: Arc<dyn SecretSource>,
        metrics: Arc<dyn MetricsStore>,
        run_state: Arc<dyn RunStateStore>,
        options: SyncOptions,
    ) -> Self {
        Self {
            runner: ItemRunner {
                registry,
                secrets,
                metrics,
                run_state,
                options: Arc::new(options),
            },
            outcomes: None,
        }
    }

    /// Engine over a storage backend, with the audit log attached.
    pub fn from_handles(
        registry: Arc<IntegrationRegistry>,
        secrets: Arc<dyn SecretSource>,
        handles: &StorageHandles,
        options: SyncOptions,
    ) -> Self {
        Self::new(
            registry,
            secrets,
            Arc::clone(&handles.metrics),
            Arc::clone(&handles.run_state),
            options,
        )
        .with_outcome_log(Arc::clone(&handles.outcomes))
    }

    /// Record every item outcome in `log` after each run.
    pub fn with_outcome_log(mut self, log: Arc<dyn OutcomeLog>) -> Self {
        self.outcomes = Some(log);
        self
    }

    pub fn options(&self) -> &SyncOptions {
        &self.runner.options
    }

    /// Run with the current time as `now`.
    pub async fn run(&self, filter: &RunFilter) -> Report {
        self.run_at(filter, Utc::now()).await
    }

    /// Run with an explicit `now`.
    pub async fn run_at(&self, filter: &RunFilter, now: DateTime<Utc>) -> Report {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let span = tracing::info_span!("sync_run", run_id = %run_id);

        async {
            tracing::info!(
                metric = filter.metric.as_deref(),
                user_id = filter.user_id.as_deref(),
                manual = filter.is_manual(),
                "Sync run started"
            );

            let (items, truncated) = match self.plan(filter).await {
                Ok(work) => self.execute(work, filter, now).await,
                Err(outcome) => (vec![outcome], false),
            };

            let report = Report {
                run_id,
                run_time: now,
                started_at,
                finished_at: Utc::now(),
                truncated,
                items,
            };
            self.record_outcomes(&report).await;

            let summary = report.summary();
            tracing::info!(
                total = summary.total,
                succeeded = summary.succeeded,
                transient_failures = summary.transient_failures,
                fatal_failures = summary.fatal_failures,
                records = summary.records,
                truncated,
                "Sync run finished"
            );
            report
        }
        .instrument(span)
        .await
    }

    /// Enumerate work items, metric-major.
    ///
    /// Problems that make the whole run meaningless come back as a single
    /// outcome instead of items.
    async fn plan(&self, filter: &RunFilter) -> Result<Vec<(String, String)>, ItemOutcome> {
        let wildcard_user = || filter.user_id.clone().unwrap_or_else(|| WILDCARD.to_string());
        let wildcard_metric = || filter.metric.clone().unwrap_or_else(|| WILDCARD.to_string());

        if let Err(e) = filter.validate() {
            return Err(ItemOutcome::failure(WILDCARD, WILDCARD, None, &e));
        }

        let registry = &self.runner.registry;
        let metrics: Vec<String> = match filter.metric.as_deref() {
            Some(metric) => match registry.resolve(metric) {
                Ok(_) => vec![metric.to_string()],
                Err(e) => {
                    return Err(ItemOutcome::failure(
                        wildcard_user(),
                        metric,
                        None,
                        &SyncError::from(e),
                    ));
                }
            },
            None => registry.metric_types().into_iter().map(String::from).collect(),
        };

        let users = match filter.user_id.as_deref() {
            Some(user) => vec![user.to_string()],
            None => self.known_users().await.map_err(|e| {
                ItemOutcome::failure(WILDCARD, wildcard_metric(), None, &e)
            })?,
        };

        Ok(metrics
            .iter()
            .flat_map(|metric| users.iter().map(|user| (user.clone(), metric.clone())))
            .collect())
    }

    /// Configured users plus checkpointed users, or the default user.
    async fn known_users(&self) -> Result<Vec<String>, SyncError> {
        let options = &self.runner.options;
        let mut users: BTreeSet<String> = options.users.iter().cloned().collect();

        let stored = bounded(
            options.store_timeout,
            "run_state.list_users",
            SyncError::Persistence,
            self.runner.run_state.list_users(),
        )
        .await;
        match stored {
            Ok(stored) => users.extend(stored),
            Err(e) if !users.is_empty() => {
                tracing::warn!(
                    error = %e,
                    "Failed to list checkpointed users, using configured users"
                );
            }
            Err(e) => return Err(e),
        }

        if users.is_empty() {
            users.insert(options.default_user.clone());
        }
        Ok(users.into_iter().collect())
    }

    /// Run items on the worker pool. Returns outcomes in item order and
    /// whether the deadline cut the run short.
    async fn execute(
        &self,
        work: Vec<(String, String)>,
        filter: &RunFilter,
        now: DateTime<Utc>,
    ) -> (Vec<ItemOutcome>, bool) {
        let options = &self.runner.options;
        let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
        let deadline = options
            .run_deadline
            .map(|limit| tokio::time::Instant::now() + limit);

        let mut tasks = JoinSet::new();
        for (index, (user_id, metric)) in work.iter().cloned().enumerate() {
            let runner = self.runner.clone();
            let semaphore = Arc::clone(&semaphore);
            let filter = filter.clone();
            let span = tracing::info_span!("sync_item", user_id = %user_id, metric = %metric);
            tasks.spawn(
                async move {
                    let _permit = semaphore.acquire_owned().await;
                    let outcome = runner.run_item(user_id, metric, &filter, now).await;
                    (index, outcome)
                }
                .instrument(span),
            );
        }

        let mut slots: Vec<Option<ItemOutcome>> = vec![None; work.len()];
        let mut truncated = false;
        loop {
            let next = match deadline {
                Some(at) => match tokio::time::timeout_at(at, tasks.join_next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        truncated = true;
                        tracing::warn!(
                            unfinished = tasks.len(),
                            "Run deadline reached, aborting unfinished items"
                        );
                        drain_aborted(&mut tasks, &mut slots).await;
                        break;
                    }
                },
                None => tasks.join_next().await,
            };

            match next {
                None => break,
                Some(joined) => collect_joined(&mut slots, joined),
            }
        }

        let items = slots
            .into_iter()
            .zip(work)
            .filter_map(|(slot, (user_id, metric))| match slot {
                Some(outcome) => Some(outcome),
                // Only a panic leaves a slot empty on a complete run.
                None if !truncated => Some(ItemOutcome::failure(
                    user_id,
                    metric,
                    None,
                    &SyncError::Configuration("sync task panicked".to_string()),
                )),
                None => None,
            })
            .collect();
        (items, truncated)
    }

    /// Best-effort append to the audit log.
    async fn record_outcomes(&self, report: &Report) {
        let Some(log) = &self.outcomes else {
            return;
        };
        if report.items.is_empty() {
            return;
        }
        let records = report.to_records();
        let result = bounded(
            self.runner.options.store_timeout,
            "outcomes.append",
            SyncError::Persistence,
            log.append_outcomes(&records),
        )
        .await;
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to record sync outcomes");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::ErrorKind;

    #[test]
    fn test_sync_options_defaults() {
        let options = SyncOptions::default();
        assert_eq!(options.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(options.fetch_timeout, Duration::from_secs(60));
        assert_eq!(options.store_timeout, Duration::from_secs(10));
        assert_eq!(options.backfill_days, 7);
        assert_eq!(options.default_user, "default");
        assert!(options.run_deadline.is_none());
    }

    #[tokio::test]
    async fn test_bounded_timeout_maps_kind() {
        let err = bounded(
            Duration::from_millis(10),
            "slow op",
            SyncError::Persistence,
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<(), SyncError>(())
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert!(err.detail().contains("slow op timed out"));
    }

    #[tokio::test]
    async fn test_drain_aborted_keeps_finished_outcomes() {
        let mut tasks = JoinSet::new();
        tasks.spawn(async {
            let err = SyncError::Configuration("done".to_string());
            (0, ItemOutcome::failure("u1", "steps", None, &err))
        });
        tasks.spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            let err = SyncError::Configuration("never".to_string());
            (1, ItemOutcome::failure("u2", "steps", None, &err))
        });
        // Let the first task complete without being joined.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut slots = vec![None, None];
        drain_aborted(&mut tasks, &mut slots).await;

        assert_eq!(slots[0].as_ref().map(|o| o.user_id.as_str()), Some("u1"));
        assert!(slots[1].is_none());
        assert!(tasks.is_empty());
    }
}
