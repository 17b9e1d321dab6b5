//! Record sinks
//!
//! `FileEventSink` appends rendered lines into a category/date partitioned
//! tree that `LogLifecycleManager` later compresses and purges.
//! `MemoryEventSink` keeps records in memory for tests and dry runs.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use parking_lot::Mutex;

use crate::errors::{EsError, EsErrorKind};
use crate::model::LogRecord;

pub trait EventSink: Send + Sync {
    fn append(&self, record: &LogRecord) -> Result<(), EsError>;

    fn flush(&self) -> Result<(), EsError> {
        Ok(())
    }
}

/// `<root>/<category>/<date>/<date>_<category>.log`
pub fn log_path(root: &Path, category: &str, date: NaiveDate) -> PathBuf {
    let day = date.format("%Y-%m-%d").to_string();
    root.join(category)
        .join(&day)
        .join(format!("{day}_{category}.log"))
}

struct OpenLog {
    date: NaiveDate,
    path: PathBuf,
    file: File,
}

pub struct FileEventSink {
    root: PathBuf,
    open: Mutex<HashMap<String, OpenLog>>,
}

impl FileEventSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            open: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path the sink is currently writing for `category`, if any.
    pub fn current_path(&self, category: &str) -> Option<PathBuf> {
        self.open.lock().get(category).map(|log| log.path.clone())
    }
}

impl EventSink for FileEventSink {
    fn append(&self, record: &LogRecord) -> Result<(), EsError> {
        if record.category.is_empty() || record.category.contains(['/', '\\']) {
            return Err(EsErrorKind::AppendRejected(format!(
                "invalid category '{}'",
                record.category
            ))
            .into());
        }
        let date = record.ts.with_timezone(&Local).date_naive();
        let mut open = self.open.lock();
        let stale = open
            .get(&record.category)
            .map_or(true, |log| log.date != date || !log.path.exists());
        if stale {
            let path = log_path(&self.root, &record.category, date);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|err| EsError::io(parent, err))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|err| EsError::io(&path, err))?;
            open.insert(record.category.clone(), OpenLog { date, path, file });
        }
        let Some(log) = open.get_mut(&record.category) else {
            return Err(EsErrorKind::Internal("log handle vanished".into()).into());
        };
        let mut line = record.render_line();
        line.push('\n');
        log.file
            .write_all(line.as_bytes())
            .map_err(|err| EsError::io(&log.path, err))
    }

    fn flush(&self) -> Result<(), EsError> {
        for log in self.open.lock().values_mut() {
            log.file.flush().map_err(|err| EsError::io(&log.path, err))?;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryEventSink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl EventSink for MemoryEventSink {
    fn append(&self, record: &LogRecord) -> Result<(), EsError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}
