use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::Args;
use serde::Serialize;
use stepwise_event_store::{latest_log_date, list_logs, read_log};
use tracing::debug;

use super::output::OutputFormat;
use crate::config::AppConfig;

pub const DEFAULT_LOG_CATEGORY: &str = "errors";

#[derive(Args, Clone, Debug, Default)]
pub struct LogsArgs {
    /// Log category (errors, performance, steps, ...) [default: errors]
    pub category: Option<String>,

    /// Day to show (YYYY-MM-DD); defaults to today, else the latest day with a log
    #[arg(long, value_name = "DATE")]
    pub date: Option<NaiveDate>,

    /// Only print the last N lines
    #[arg(long, value_name = "N")]
    pub tail: Option<usize>,

    /// List the categories and days that have logs
    #[arg(long, conflicts_with_all = ["category", "date", "tail"])]
    pub list: bool,

    /// Artifact root (overrides retention.root)
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum LogsView {
    Listing {
        root: PathBuf,
        categories: BTreeMap<String, Vec<NaiveDate>>,
    },
    Log {
        category: String,
        date: NaiveDate,
        path: PathBuf,
        compressed: bool,
        total_lines: usize,
        lines: Vec<String>,
    },
    Missing {
        category: String,
        date: NaiveDate,
    },
}

impl LogsView {
    pub fn render_text(&self) -> String {
        match self {
            LogsView::Listing { root, categories } => {
                if categories.is_empty() {
                    return format!("No logs under {}", root.display());
                }
                let mut out = format!("Logs under {}:", root.display());
                for (category, dates) in categories {
                    let days = dates
                        .iter()
                        .map(|d| d.format("%Y-%m-%d").to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    let _ = write!(out, "\n  {category:<12} {days}");
                }
                out
            }
            LogsView::Log {
                category,
                date,
                path,
                compressed,
                total_lines,
                lines,
            } => {
                let mut out = format!("{category} log for {date} ({}", path.display());
                if *compressed {
                    out.push_str(", compressed");
                }
                out.push(')');
                if lines.len() < *total_lines {
                    let _ = write!(out, ", last {} of {} lines", lines.len(), total_lines);
                }
                for line in lines {
                    out.push('\n');
                    out.push_str(line);
                }
                out
            }
            LogsView::Missing { category, date } => format!("No {category} log for {date}"),
        }
    }
}

pub fn cmd_logs(args: &LogsArgs, config: &AppConfig, output: OutputFormat) -> Result<LogsView> {
    let root = args.root.clone().unwrap_or_else(|| config.retention.root.clone());
    let view = if args.list {
        let categories = list_logs(&root)
            .with_context(|| format!("failed to list logs under {}", root.display()))?;
        LogsView::Listing { root, categories }
    } else {
        let category = args.category.as_deref().unwrap_or(DEFAULT_LOG_CATEGORY);
        if category.is_empty() || category.contains(['/', '\\']) || category.starts_with('.') {
            bail!("invalid log category '{category}'");
        }
        let date = match args.date {
            Some(date) => date,
            None => {
                let today = Local::now().date_naive();
                match read_log(&root, category, today)? {
                    Some(_) => today,
                    None => latest_log_date(&root, category)?.unwrap_or(today),
                }
            }
        };
        debug!(category, %date, root = %root.display(), "reading log");
        match read_log(&root, category, date)
            .with_context(|| format!("failed to read {category} log for {date}"))?
        {
            Some(file) => {
                let total_lines = file.lines.len();
                let lines = match args.tail {
                    Some(n) => file.tail(n).to_vec(),
                    None => file.lines,
                };
                LogsView::Log {
                    category: file.category,
                    date: file.date,
                    path: file.path,
                    compressed: file.compressed,
                    total_lines,
                    lines,
                }
            }
            None => LogsView::Missing {
                category: category.to_string(),
                date,
            },
        }
    };
    println!("{}", output.render(&view, || view.render_text())?);
    Ok(view)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn may(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[test]
    fn tailed_log_mentions_what_was_cut() {
        let view = LogsView::Log {
            category: "errors".into(),
            date: may(2),
            path: PathBuf::from("logs/errors/2024-05-02/2024-05-02_errors.log.zst"),
            compressed: true,
            total_lines: 5,
            lines: vec!["four".into(), "five".into()],
        };
        assert_eq!(
            view.render_text(),
            "errors log for 2024-05-02 (logs/errors/2024-05-02/2024-05-02_errors.log.zst, compressed), last 2 of 5 lines\nfour\nfive"
        );
    }

    #[test]
    fn listing_and_missing_render() {
        let mut categories = BTreeMap::new();
        categories.insert("errors".to_string(), vec![may(1), may(2)]);
        let listing = LogsView::Listing {
            root: PathBuf::from("logs"),
            categories,
        };
        assert_eq!(listing.render_text(), "Logs under logs:\n  errors       2024-05-01, 2024-05-02");

        let missing = LogsView::Missing {
            category: "performance".into(),
            date: may(3),
        };
        assert_eq!(missing.render_text(), "No performance log for 2024-05-03");
    }

    #[test]
    fn path_like_categories_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let args = LogsArgs {
            category: Some("../etc".into()),
            root: Some(dir.path().to_path_buf()),
            ..LogsArgs::default()
        };
        let err = cmd_logs(&args, &AppConfig::default(), OutputFormat::Human).unwrap_err();
        assert!(err.to_string().contains("invalid log category"));
    }
}
