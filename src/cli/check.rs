use std::path::PathBuf;

use action_flow::RunPlan;
use action_locator::LocatorCatalog;
use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use super::output::OutputFormat;
use crate::config::AppConfig;

#[derive(Args, Clone, Debug, Default)]
pub struct CheckArgs {
    /// Run plan to validate (repeatable)
    #[arg(long = "plan", value_name = "FILE")]
    pub plans: Vec<PathBuf>,

    /// Locator catalog to validate (repeatable)
    #[arg(long = "catalog", value_name = "FILE")]
    pub catalogs: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckedFile {
    pub path: PathBuf,
    pub entries: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckSummary {
    pub config: Option<PathBuf>,
    pub plans: Vec<CheckedFile>,
    pub catalogs: Vec<CheckedFile>,
}

/// The configuration itself was validated while loading; this checks the
/// files named on the command line against it.
pub fn cmd_check(
    args: &CheckArgs,
    config: &AppConfig,
    config_path: Option<PathBuf>,
    output: OutputFormat,
) -> Result<CheckSummary> {
    config.validate().context("configuration")?;
    let mut summary = CheckSummary {
        config: config_path,
        plans: Vec::new(),
        catalogs: Vec::new(),
    };
    for path in &args.plans {
        let plan = RunPlan::load(path).with_context(|| format!("run plan {}", path.display()))?;
        summary.plans.push(CheckedFile {
            path: path.clone(),
            entries: plan.steps.len(),
        });
    }
    for path in &args.catalogs {
        let catalog =
            LocatorCatalog::load(path).with_context(|| format!("locator catalog {}", path.display()))?;
        summary.catalogs.push(CheckedFile {
            path: path.clone(),
            entries: catalog.len(),
        });
    }
    println!(
        "{}",
        output.render(&summary, || {
            let mut lines = vec![match &summary.config {
                Some(p) => format!("config ok: {}", p.display()),
                None => "config ok: built-in defaults".to_string(),
            }];
            for plan in &summary.plans {
                lines.push(format!("plan ok: {} ({} steps)", plan.path.display(), plan.entries));
            }
            for catalog in &summary.catalogs {
                lines.push(format!(
                    "catalog ok: {} ({} targets)",
                    catalog.path.display(),
                    catalog.entries
                ));
            }
            lines.join("\n")
        })?
    );
    Ok(summary)
}
