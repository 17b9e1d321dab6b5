//! Reading persisted logs back
//!
//! A day's log is either still raw or already compressed by a sweep; both
//! read the same way.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Serialize;

use crate::config::SCREENSHOTS_CATEGORY;
use crate::errors::EsError;
use crate::scan;
use crate::sink::log_path;

#[derive(Debug, Clone, Serialize)]
pub struct LogFile {
    pub category: String,
    pub date: NaiveDate,
    pub path: PathBuf,
    pub compressed: bool,
    pub lines: Vec<String>,
}

impl LogFile {
    /// Last `n` lines, oldest first.
    pub fn tail(&self, n: usize) -> &[String] {
        let start = self.lines.len().saturating_sub(n);
        &self.lines[start..]
    }
}

/// Log of `category` for `date`, preferring the raw file over its `.zst`.
/// `Ok(None)` when neither exists.
pub fn read_log(root: &Path, category: &str, date: NaiveDate) -> Result<Option<LogFile>, EsError> {
    let raw = log_path(root, category, date);
    let zst = scan::compressed_path(&raw);
    let (path, compressed) = if raw.is_file() {
        (raw, false)
    } else if zst.is_file() {
        (zst, true)
    } else {
        return Ok(None);
    };
    let file = File::open(&path).map_err(|err| EsError::io(&path, err))?;
    let read = if compressed {
        zstd::stream::read::Decoder::new(file).and_then(collect_lines)
    } else {
        collect_lines(file)
    };
    let lines = read.map_err(|err| EsError::io(&path, err))?;
    Ok(Some(LogFile {
        category: category.to_string(),
        date,
        path,
        compressed,
        lines,
    }))
}

fn collect_lines(source: impl Read) -> io::Result<Vec<String>> {
    BufReader::new(source)
        .lines()
        .filter(|line| !matches!(line, Ok(l) if l.is_empty()))
        .collect()
}

/// Dates holding a log, per category, both ascending. Screenshots and
/// directories that are not `YYYY-MM-DD` are ignored.
pub fn list_logs(root: &Path) -> Result<BTreeMap<String, Vec<NaiveDate>>, EsError> {
    let mut listing = BTreeMap::new();
    if !root.is_dir() {
        return Ok(listing);
    }
    for entry in fs::read_dir(root).map_err(|err| EsError::io(root, err))? {
        let entry = entry.map_err(|err| EsError::io(root, err))?;
        let category = entry.file_name().to_string_lossy().into_owned();
        if category == SCREENSHOTS_CATEGORY || !entry.path().is_dir() {
            continue;
        }
        let dates = log_dates(root, &category)?;
        if !dates.is_empty() {
            listing.insert(category, dates);
        }
    }
    Ok(listing)
}

/// Most recent date with a log for `category`.
pub fn latest_log_date(root: &Path, category: &str) -> Result<Option<NaiveDate>, EsError> {
    Ok(log_dates(root, category)?.pop())
}

fn log_dates(root: &Path, category: &str) -> Result<Vec<NaiveDate>, EsError> {
    let dir = root.join(category);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut dates = Vec::new();
    for entry in fs::read_dir(&dir).map_err(|err| EsError::io(&dir, err))? {
        let entry = entry.map_err(|err| EsError::io(&dir, err))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Ok(date) = NaiveDate::parse_from_str(&name, "%Y-%m-%d") else {
            continue;
        };
        let raw = log_path(root, category, date);
        if raw.is_file() || scan::compressed_path(&raw).is_file() {
            dates.push(date);
        }
    }
    dates.sort();
    Ok(dates)
}
