use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use super::output::OutputFormat;
use crate::config::AppConfig;
use crate::maintenance::MaintenanceReport;
use crate::services::RunServices;

#[derive(Args, Clone, Debug, Default)]
pub struct ReportArgs {
    /// Artifact root (overrides retention.root)
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Only show this category
    #[arg(long)]
    pub category: Option<String>,
}

pub fn cmd_report(args: &ReportArgs, config: &AppConfig, output: OutputFormat) -> Result<MaintenanceReport> {
    let mut config = config.clone();
    if let Some(root) = &args.root {
        config.retention.root = root.clone();
    }
    let services = RunServices::new(config)?;
    let mut report = services.maintenance_report()?;
    if let Some(category) = &args.category {
        report.artifacts.categories.retain(|name, _| name == category);
    }
    println!("{}", output.render(&report, || report.render_text())?);
    Ok(report)
}
