use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pigeon::cache::QueryCache;
use pigeon::config::AppConfig;
use pigeon::notify::Notifier;
use pigeon::pipeline::{CycleError, Pipeline, PipelineSettings};
use pigeon::storage::Database;

#[derive(Parser, Debug)]
#[command(name = "pigeon", about = "RSS keyword watcher with Telegram delivery")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, value_name = "FILE", default_value = "pigeon.toml")]
    config: PathBuf,

    /// Run a single ingestion cycle, print the summary as JSON, and exit
    #[arg(long)]
    once: bool,

    /// Delete posts past the retention window and exit
    #[arg(long)]
    cleanup: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let cfg = AppConfig::load(&args.config).context("Failed to load configuration")?;

    let cache = Arc::new(QueryCache::new());
    let db = Database::open(&cfg.database_path, cache)
        .await
        .with_context(|| format!("Failed to open database at '{}'", cfg.database_path))?;

    if args.cleanup {
        let removed = db.cleanup_older_than(cfg.retention_hours).await?;
        println!("Removed {} posts older than {}h", removed, cfg.retention_hours);
        return Ok(());
    }

    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")?;
    let notifier = Notifier::new(client.clone(), cfg.telegram_api_base.clone());
    let pipeline = Pipeline::new(
        db.clone(),
        client,
        notifier,
        PipelineSettings {
            feed_url: cfg.feed_url.clone(),
            post_url_template: cfg.post_url_template.clone(),
            fetch_timeout: Duration::from_secs(cfg.fetch_timeout_secs),
        },
    );

    if args.once {
        let summary = pipeline.run_cycle().await?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    run_scheduler(&cfg, &db, &pipeline).await
}

/// Poll loop. A failed cycle, including one aborted because the bot is not
/// configured yet, is logged and retried on the next tick.
async fn run_scheduler(cfg: &AppConfig, db: &Database, pipeline: &Pipeline) -> Result<()> {
    let mut ticker = tokio::time::interval(Duration::from_secs(cfg.tick_interval_secs.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    // One cleanup per hour, independent of the tick cadence
    let mut last_cleanup = tokio::time::Instant::now();
    let cleanup_every = Duration::from_secs(3600);

    tracing::info!(
        feed_url = %cfg.feed_url,
        tick_interval_secs = cfg.tick_interval_secs,
        "scheduler started"
    );

    loop {
        ticker.tick().await;

        match pipeline.run_cycle().await {
            Ok(summary) => {
                tracing::debug!(
                    ingested = summary.ingested,
                    delivered = summary.delivered,
                    "tick done"
                );
            }
            Err(CycleError::NotInitialized) => {
                // The config row is created through the management surface,
                // possibly after the process is already up. Keep ticking.
                tracing::warn!("bot not configured yet, skipping tick");
            }
            Err(CycleError::AlreadyRunning) => {
                tracing::warn!("previous cycle still running, skipping tick");
            }
            Err(err) => {
                tracing::error!(error = %err, "cycle failed, will retry next tick");
            }
        }

        if last_cleanup.elapsed() >= cleanup_every {
            match db.cleanup_older_than(cfg.retention_hours).await {
                Ok(removed) if removed > 0 => {
                    tracing::info!(removed, "retention cleanup done");
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(error = %err, "retention cleanup failed"),
            }
            last_cleanup = tokio::time::Instant::now();
        }
    }
}
