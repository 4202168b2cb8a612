use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use engine::{cancel_pair, CancelHandle, Orchestrator, SyncOptions, SyncSummary};
use github::{catalog, ConformingSink, GithubTransport};
use state::{JsonFileBookmarkStore, MemoryBookmarkStore};
use tap::BookmarkStore;

use crate::config::Config;
use crate::sink::JsonLinesSink;

/// Execute the `run` command: load the config, extract, and write records to
/// stdout.
pub async fn execute(config_path: &Path, state_override: Option<PathBuf>, timeout: Option<u64>) -> Result<()> {
    let config = Config::load(config_path)
        .with_context(|| format!("Failed to load config: {}", config_path.display()))?;

    let graph = Arc::new(catalog(&config.catalog_config()?).context("Invalid stream catalog")?);
    let transport = Arc::new(
        GithubTransport::new(config.transport_config()).context("Failed to set up the GitHub client")?,
    );
    let store = open_store(state_override.or_else(|| config.state_path.clone())).await?;
    let sink = Arc::new(ConformingSink::new(JsonLinesSink::stdout()));

    let (handle, cancel) = cancel_pair();
    let handle = Arc::new(handle);
    spawn_interrupt(handle.clone());
    if let Some(secs) = timeout {
        spawn_deadline(handle, Duration::from_secs(secs));
    }

    let orchestrator = Orchestrator::new(
        graph,
        transport,
        store,
        sink,
        SyncOptions {
            start_date: config.start_date,
            streams: config.streams.clone(),
            cancel,
        },
    )?;

    tracing::info!(
        run_id = %orchestrator.run_id(),
        query = %config.search_query,
        streams = ?config.streams,
        "Configuration loaded"
    );

    let summary = orchestrator.start().await.context("Sync failed")?;
    report(&summary);
    Ok(())
}

async fn open_store(path: Option<PathBuf>) -> Result<Arc<dyn BookmarkStore>> {
    match path {
        Some(path) => {
            let store = JsonFileBookmarkStore::open(&path)
                .await
                .with_context(|| format!("Failed to open state file: {}", path.display()))?;
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("No state path configured; bookmarks will not outlive this run");
            Ok(Arc::new(MemoryBookmarkStore::new()))
        }
    }
}

fn spawn_interrupt(handle: Arc<CancelHandle>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current record");
            handle.cancel();
        }
    });
}

fn spawn_deadline(handle: Arc<CancelHandle>, after: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        tracing::warn!(timeout_secs = after.as_secs(), "Timeout reached, stopping");
        handle.cancel();
    });
}

fn report(summary: &SyncSummary) {
    eprintln!("Sync completed.");
    eprintln!("  Records:  {}", summary.total_records());
    eprintln!("  Requests: {}", summary.total_requests());
    for (stream, stats) in &summary.streams {
        eprintln!(
            "  {:<20} records={:<8} pages={:<6} skipped={:<6} tolerated={}",
            stream.as_str(),
            stats.records,
            stats.pages,
            stats.skipped,
            stats.tolerated
        );
    }
}
