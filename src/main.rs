// ABOUTME: Entry point for the fitsync binary.
// ABOUTME: Inspects the local sync queue, drains it on demand, and watches connectivity from the command line.

use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::{DateTime, TimeDelta, Utc};
use clap::{Parser, Subcommand};
use fitsync_core::SyncStatus;
use fitsync_sync::{
    DataAccess, HttpRemote, ManualReachability, PollingReachability, QueueDrainer, SyncConfig,
    SyncContext, monitor,
};
use futures::StreamExt;

#[derive(Parser, Debug)]
#[command(name = "fitsync", version)]
#[command(about = "Offline-first sync for fitness data: inspect and replay the local mutation queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show backend reachability, schema version, and queue totals
    Status,
    /// List queued mutations, oldest first
    Queue {
        /// Only show entries with this status (pending, syncing, completed, failed)
        #[arg(long)]
        status: Option<SyncStatus>,
        /// Print entries as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Replay the queue once against the backend
    Sync,
    /// Follow connectivity and replay the queue whenever the backend comes back
    Watch,
    /// Delete old completed entries and expired lookup cache entries
    Prune {
        /// Keep completed entries newer than this many days
        #[arg(long, default_value_t = 30)]
        days: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("fitsync=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env().context("invalid configuration")?;
    let remote = HttpRemote::from_config(&config).context("cannot build HTTP client")?;

    match cli.command {
        Command::Status => status(config, remote).await,
        Command::Queue { status, json } => queue(config, remote, status, json).await,
        Command::Sync => sync(config, remote).await,
        Command::Watch => watch(config, remote).await,
        Command::Prune { days } => prune(config, remote, days).await,
    }
}

/// Context for one-shot commands, using a single reachability probe.
async fn probed_context(config: SyncConfig, remote: HttpRemote) -> anyhow::Result<SyncContext> {
    let reachable = remote.probe(&config.health_path).await;
    let ctx = SyncContext::open(
        config,
        Arc::new(remote),
        Arc::new(ManualReachability::new(reachable)),
    )
    .await;
    if ctx.store().is_none() {
        bail!("local store is unavailable");
    }
    Ok(ctx)
}

async fn status(config: SyncConfig, remote: HttpRemote) -> anyhow::Result<()> {
    let api_url = config.api_url.clone();
    let ctx = probed_context(config, remote).await?;
    let store = ctx.store().context("local store is unavailable")?;
    let queue = ctx.queue().context("local store is unavailable")?;

    let counts = queue.counts().await?;
    println!("backend:    {} ({})", api_url, ctx.connectivity());
    if let Some(path) = store.path() {
        println!("store:      {}", path.display());
    }
    println!("schema:     v{}", store.schema_version().await?);
    println!(
        "queue:      {} pending, {} syncing, {} failed, {} completed",
        counts.pending, counts.syncing, counts.failed, counts.completed
    );
    Ok(())
}

async fn queue(
    config: SyncConfig,
    remote: HttpRemote,
    status: Option<SyncStatus>,
    json: bool,
) -> anyhow::Result<()> {
    let ctx = probed_context(config, remote).await?;
    let queue = ctx.queue().context("local store is unavailable")?;
    let entries = match status {
        Some(status) => queue.list_by_status(status).await?,
        None => queue.list_all().await?,
    };

    for entry in entries {
        if json {
            println!("{}", serde_json::to_string(&entry)?);
            continue;
        }
        let error = entry.last_error.as_deref().unwrap_or("");
        println!(
            "{}  {:<9}  {:<6}  {}  retries={}  {}",
            entry.id, entry.status, entry.method, entry.endpoint, entry.retry_count, error
        );
    }
    Ok(())
}

async fn sync(config: SyncConfig, remote: HttpRemote) -> anyhow::Result<()> {
    let ctx = probed_context(config, remote).await?;
    if ctx.connectivity().is_offline() {
        bail!("backend at {} is unreachable", ctx.config().api_url);
    }

    let report = QueueDrainer::new(ctx.clone()).drain().await?;
    println!(
        "replayed {} entries: {} completed, {} failed, {} left for later",
        report.attempted,
        report.completed,
        report.failed,
        report.skipped + report.deferred
    );
    if report.connectivity_lost {
        bail!("lost connection to the backend during sync");
    }
    Ok(())
}

async fn watch(config: SyncConfig, remote: HttpRemote) -> anyhow::Result<()> {
    let signal = PollingReachability::start(
        remote.clone(),
        config.health_path.clone(),
        config.poll_interval,
    )
    .await;
    let ctx = SyncContext::open(config, Arc::new(remote), Arc::new(signal)).await;
    let mut events = ctx.subscribe().boxed();
    let handle = monitor::spawn(ctx);
    println!("watching ({}), press ctrl-c to stop", handle.state());

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(event) => println!("{}", serde_json::to_string(&event)?),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

async fn prune(config: SyncConfig, remote: HttpRemote, days: i64) -> anyhow::Result<()> {
    let cutoff = prune_cutoff(Utc::now(), days)?;
    let ctx = probed_context(config, remote).await?;
    let queue = ctx.queue().context("local store is unavailable")?;

    let pruned = queue.prune_completed(cutoff).await?;
    let evicted = DataAccess::new(ctx.clone()).evict_stale_lookups().await?;
    println!(
        "removed {} completed entries and {} expired lookups",
        pruned, evicted
    );
    Ok(())
}

/// Oldest completion time `prune --days` keeps.
fn prune_cutoff(now: DateTime<Utc>, days: i64) -> anyhow::Result<DateTime<Utc>> {
    if days < 0 {
        bail!("--days must not be negative");
    }
    TimeDelta::try_days(days)
        .and_then(|age| now.checked_sub_signed(age))
        .with_context(|| format!("--days {} reaches past the earliest representable date", days))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prune_cutoff_counts_back_whole_days() {
        let now = Utc::now();
        assert_eq!(prune_cutoff(now, 0).unwrap(), now);
        assert_eq!(prune_cutoff(now, 30).unwrap(), now - TimeDelta::days(30));
    }

    #[test]
    fn prune_cutoff_rejects_out_of_range_days() {
        let now = Utc::now();
        assert!(prune_cutoff(now, -1).is_err());
        assert!(prune_cutoff(now, i64::MAX).is_err());
        assert!(prune_cutoff(now, 400_000_000).is_err());
    }
}
