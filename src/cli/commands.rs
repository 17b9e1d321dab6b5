use clap::Subcommand;

use super::check::CheckArgs;
use super::logs::LogsArgs;
use super::report::ReportArgs;
use super::sweep::SweepArgs;
use super::watch::WatchArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Compress and purge aged logs and screenshots once
    Sweep(SweepArgs),

    /// Sweep periodically until interrupted
    Watch(WatchArgs),

    /// Show artifact counts and sizes per category
    Report(ReportArgs),

    /// Validate configuration, run plans and locator catalogs
    Check(CheckArgs),

    /// Show a day's log for one category, or list what is available
    Logs(LogsArgs),
}
