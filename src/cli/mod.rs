pub mod app;
pub mod check;
pub mod commands;
pub mod env;
pub mod logs;
pub mod output;
pub mod report;
pub mod sweep;
pub mod watch;

pub use app::run;
pub use check::{cmd_check, CheckArgs, CheckSummary};
pub use commands::Commands;
pub use env::CliArgs;
pub use logs::{cmd_logs, LogsArgs, LogsView};
pub use output::OutputFormat;
pub use report::{cmd_report, ReportArgs};
pub use sweep::{cmd_sweep, SweepArgs};
pub use watch::{cmd_watch, WatchArgs};
