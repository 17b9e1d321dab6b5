use clap::Parser;
use std::path::PathBuf;

use super::commands::Commands;

/// Stepwise - maintenance for resilient UI automation runs
#[derive(Parser)]
#[command(author, version = crate::VERSION, about, long_about = None)]
#[command(propagate_version = true)]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level (overrides logging.level)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Enable debug mode
    #[arg(short, long)]
    pub debug: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "human")]
    pub output: super::output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{LogsArgs, OutputFormat};
    use clap::CommandFactory;
    use std::time::Duration;

    #[test]
    fn command_definition_is_consistent() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn parses_watch_with_interval() {
        let cli = CliArgs::try_parse_from([
            "stepwise", "-o", "json", "watch", "--interval", "15m", "--root", "/tmp/logs",
        ])
        .unwrap();
        assert_eq!(cli.output, OutputFormat::Json);
        match cli.command {
            Commands::Watch(args) => {
                assert_eq!(args.interval, Some(Duration::from_secs(900)));
                assert_eq!(args.root, Some(PathBuf::from("/tmp/logs")));
            }
            _ => panic!("expected watch"),
        }
    }

    #[test]
    fn check_accepts_repeated_files() {
        let cli = CliArgs::try_parse_from([
            "stepwise", "check", "--plan", "a.yaml", "--plan", "b.yaml", "--catalog", "t.yaml",
        ])
        .unwrap();
        let Commands::Check(args) = cli.command else {
            panic!("expected check");
        };
        assert_eq!(args.plans.len(), 2);
        assert_eq!(args.catalogs, vec![PathBuf::from("t.yaml")]);
    }

    #[test]
    fn parses_logs_view_and_listing() {
        let cli = CliArgs::try_parse_from([
            "stepwise", "logs", "performance", "--date", "2024-05-02", "--tail", "20",
        ])
        .unwrap();
        let Commands::Logs(args) = cli.command else {
            panic!("expected logs");
        };
        assert_eq!(args.category.as_deref(), Some("performance"));
        assert_eq!(args.date, chrono::NaiveDate::from_ymd_opt(2024, 5, 2));
        assert_eq!(args.tail, Some(20));

        let cli = CliArgs::try_parse_from(["stepwise", "logs", "--list"]).unwrap();
        assert!(matches!(cli.command, Commands::Logs(LogsArgs { list: true, .. })));
        assert!(CliArgs::try_parse_from(["stepwise", "logs", "--list", "--tail", "3"]).is_err());
        assert!(CliArgs::try_parse_from(["stepwise", "logs", "--date", "yesterday"]).is_err());
    }

    #[test]
    fn rejects_unparseable_interval() {
        assert!(CliArgs::try_parse_from(["stepwise", "watch", "--interval", "soon"]).is_err());
    }
}
