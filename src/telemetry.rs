//! Process-wide tracing setup

use std::fs;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::AppConfig;

static INIT: OnceCell<()> = OnceCell::new();

pub const SESSION_LOG_PREFIX: &str = "stepwise.log";

/// Install the global subscriber once. `level` overrides the configured
/// default filter; `RUST_LOG` overrides both. Later calls are no-ops.
pub fn init_tracing(config: &AppConfig, level: Option<&str>) -> Result<()> {
    INIT.get_or_try_init(|| {
        let level = level.unwrap_or(&config.logging.level);
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level))
            .with_context(|| format!("invalid log filter '{level}'"))?;

        let (json_console, text_console) = if config.logging.json {
            (Some(fmt::layer().json().with_target(false)), None)
        } else {
            (None, Some(fmt::layer().with_target(false)))
        };

        let file = if config.logging.to_file {
            let dir = config.session_log_dir();
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_thread_ids(true)
                    .with_writer(rolling::daily(&dir, SESSION_LOG_PREFIX)),
            )
        } else {
            None
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(json_console)
            .with(text_console)
            .with(file)
            .try_init()
            .context("failed to install tracing subscriber")
    })?;
    Ok(())
}
