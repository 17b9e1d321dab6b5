use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use stepwise_event_store::{LogLifecycleManager, SweepReport};
use tracing::info;

use super::output::OutputFormat;
use crate::config::AppConfig;
use crate::maintenance::render_sweep;

#[derive(Args, Clone, Debug, Default)]
pub struct SweepArgs {
    /// Artifact root (overrides retention.root)
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,
}

pub fn cmd_sweep(args: &SweepArgs, config: &AppConfig, output: OutputFormat) -> Result<SweepReport> {
    let mut policy = config.retention.clone();
    if let Some(root) = &args.root {
        policy.root = root.clone();
    }
    let manager = LogLifecycleManager::new(policy).context("invalid retention policy")?;
    let report = manager.sweep();
    info!(
        compressed = report.compressed,
        purged = report.purged,
        errors = report.errors.len(),
        "sweep finished"
    );
    println!("{}", output.render(&report, || render_sweep(&report))?);
    Ok(report)
}
