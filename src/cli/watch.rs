use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use stepwise_event_store::LogLifecycleManager;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AppConfig;

#[derive(Args, Clone, Debug, Default)]
pub struct WatchArgs {
    /// Artifact root (overrides retention.root)
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Time between sweeps, e.g. "15m" (overrides retention.sweep_interval_ms)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub interval: Option<Duration>,
}

/// Sweep until `shutdown` fires.
pub async fn cmd_watch(args: &WatchArgs, config: &AppConfig, shutdown: CancellationToken) -> Result<()> {
    let mut policy = config.retention.clone();
    if let Some(root) = &args.root {
        policy.root = root.clone();
    }
    let interval = args.interval.unwrap_or_else(|| policy.sweep_interval());
    let manager = Arc::new(LogLifecycleManager::new(policy).context("invalid retention policy")?);
    info!(
        root = %manager.policy().root.display(),
        interval = %humantime::format_duration(interval),
        "watching artifacts"
    );
    let handle = manager.spawn_periodic(interval, shutdown.clone());
    shutdown.cancelled().await;
    if let Err(err) = handle.await {
        warn!(error = %err, "sweeper task ended abnormally");
    }
    info!("watch stopped");
    Ok(())
}
