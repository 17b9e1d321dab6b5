//! Stepwise library
//!
//! Service wiring, configuration and the maintenance CLI around the
//! workspace crates. Exposed as a library for integration testing.

pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod maintenance;
pub mod services;
pub mod telemetry;

pub use config::{load_config, load_layered, AppConfig, ConfigError, LoadedConfig, LoggingConfig};
pub use diagnostics::{screenshot_summary, ScreenshotCapture, ScreenshotSource, ScreenshotSummary};
pub use maintenance::{render_sweep, MaintenanceReport};
pub use services::RunServices;
pub use telemetry::init_tracing;

pub const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_HASH"),
    ", built ",
    env!("BUILD_DATE"),
    ")"
);
