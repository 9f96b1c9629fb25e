//! metric-sync Binary Entry Point
//!
//! Runs one sync batch and exits. Meant to be started by an external
//! scheduler; the invocation payload comes from `--event` or CLI flags.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use clap::{Parser, ValueEnum};
use metric_sync::{
    config::{AppConfig, parse_date, parse_duration},
    integration::IntegrationRegistry,
    storage::StorageBuilder,
    sync::{RunFilter, SyncEngine},
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// metric-sync - Incremental per-user metric synchronization
#[derive(Parser, Debug)]
#[command(name = "metric-sync", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (defaults apply when omitted)
    #[arg(short, long, env = "METRIC_SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Database path or URL (overrides config file)
    #[arg(long, env = "METRIC_SYNC_DB_URL")]
    db_url: Option<String>,

    /// JSON invocation payload file, `-` for stdin
    #[arg(long)]
    event: Option<PathBuf>,

    /// Only sync this metric type
    #[arg(long)]
    metric: Option<String>,

    /// Only sync this user
    #[arg(long)]
    user_id: Option<String>,

    /// First day to re-collect (YYYY-MM-DD); the checkpoint is not moved
    #[arg(long, value_parser = parse_date)]
    start_date: Option<NaiveDate>,

    /// Last day to re-collect (YYYY-MM-DD); the checkpoint is not moved
    #[arg(long, value_parser = parse_date)]
    end_date: Option<NaiveDate>,

    /// Fail the invocation if any item fails
    #[arg(long)]
    strict: bool,

    /// Overall run budget, e.g. `14m` (overrides config file)
    #[arg(long, value_parser = parse_duration)]
    deadline: Option<Duration>,

    /// Log output format
    #[arg(long, value_enum, default_value = "text", env = "METRIC_SYNC_LOG_FORMAT")]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,metric_sync=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries the report.
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

/// Payload from `--event`, then individual flags on top.
fn build_filter(cli: &Cli) -> Result<RunFilter, Box<dyn std::error::Error>> {
    let mut filter = match &cli.event {
        Some(path) if path.as_os_str() == "-" => {
            let mut payload = String::new();
            std::io::stdin().read_to_string(&mut payload)?;
            RunFilter::from_json(&payload)?
        }
        Some(path) => RunFilter::from_json(&std::fs::read_to_string(path)?)?,
        None => RunFilter::default(),
    };

    if let Some(metric) = &cli.metric {
        filter.metric = Some(metric.clone());
    }
    if let Some(user_id) = &cli.user_id {
        filter.user_id = Some(user_id.clone());
    }
    if cli.start_date.is_some() {
        filter.start_date = cli.start_date;
    }
    if cli.end_date.is_some() {
        filter.end_date = cli.end_date;
    }
    filter.validate()?;
    Ok(filter)
}

async fn run(cli: Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!(path = %path.display(), "Loading configuration");
            AppConfig::load(path)?
        }
        None => AppConfig::default(),
    };

    // CLI > ENV > config file
    if let Some(db_url) = &cli.db_url {
        config.database.path = db_url.clone();
    }
    if cli.deadline.is_some() {
        config.sync.run_deadline = cli.deadline;
    }
    let strict = cli.strict || config.sync.strict;

    let filter = build_filter(&cli)?;

    let handles = StorageBuilder::new(&config.database.path)
        .max_connections(config.database.max_connections)
        .build()
        .await?;
    let registry = IntegrationRegistry::from_config(&config.providers, &config.enabled_metrics)?;

    let engine = SyncEngine::from_handles(
        Arc::new(registry),
        config.secrets.build(),
        &handles,
        config.sync_options(),
    );
    let report = engine.run(&filter).await;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Err(e) = handles.shutdown().await {
        tracing::warn!(error = %e, "Failed to close storage");
    }

    if report.is_failure(strict) {
        tracing::error!(
            failed = report.failed_items().count(),
            total = report.items.len(),
            strict,
            "Sync invocation failed"
        );
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "metric-sync failed");
            ExitCode::FAILURE
        }
    }
}
