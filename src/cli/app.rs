use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::commands::Commands;
use super::env::CliArgs;
use super::{cmd_check, cmd_logs, cmd_report, cmd_sweep, cmd_watch};
use crate::config::{load_config, AppConfig, LoadedConfig};
use crate::telemetry::init_tracing;

pub async fn run() -> Result<()> {
    let cli = CliArgs::parse();
    let LoadedConfig { config, path } = load_config(cli.config.as_deref())?;
    let level = if cli.debug {
        Some("debug")
    } else {
        cli.log_level.as_deref()
    };
    init_tracing(&config, level)?;
    info!("Starting stepwise v{}", crate::VERSION);

    match dispatch(&cli, &config, path).await {
        Ok(()) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(err) => {
            error!("Command failed: {:#}", err);
            Err(err)
        }
    }
}

async fn dispatch(cli: &CliArgs, config: &AppConfig, config_path: Option<PathBuf>) -> Result<()> {
    match &cli.command {
        Commands::Sweep(args) => cmd_sweep(args, config, cli.output).map(|_| ()),
        Commands::Report(args) => cmd_report(args, config, cli.output).map(|_| ()),
        Commands::Check(args) => cmd_check(args, config, config_path, cli.output).map(|_| ()),
        Commands::Logs(args) => cmd_logs(args, config, cli.output).map(|_| ()),
        Commands::Watch(args) => {
            let shutdown = CancellationToken::new();
            let trigger = shutdown.clone();
            tokio::spawn(async move {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    warn!(error = %err, "failed to listen for Ctrl-C");
                }
                trigger.cancel();
            });
            cmd_watch(args, config, shutdown).await
        }
    }
}
