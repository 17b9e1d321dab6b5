//! Age-driven maintenance of log and screenshot artifacts.
//!
//! Raw files older than the compress threshold become `.zst` files with the
//! original modification time; compressed files older than the purge
//! threshold are deleted. Raw files are never deleted directly, and nothing
//! younger than `min_age` is touched.

use std::collections::BTreeMap;
use std::fs::{self, File, FileTimes};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zstd::stream::Encoder;

use crate::config::{RetentionPolicy, SCREENSHOTS_CATEGORY};
use crate::errors::{EsError, EsErrorKind};
use crate::model::{ArtifactState, LogArtifact};
use crate::scan::{self, FileEntry, FileKind};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SweepFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of one maintenance pass. Per-file failures are collected here
/// instead of aborting the pass.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub compressed: usize,
    pub purged: usize,
    pub removed_temp: usize,
    pub pruned_dirs: usize,
    pub reclaimed_bytes: u64,
    pub errors: Vec<SweepFailure>,
}

impl SweepReport {
    pub fn merge(&mut self, other: SweepReport) {
        self.compressed += other.compressed;
        self.purged += other.purged;
        self.removed_temp += other.removed_temp;
        self.pruned_dirs += other.pruned_dirs;
        self.reclaimed_bytes += other.reclaimed_bytes;
        self.errors.extend(other.errors);
    }

    pub fn is_noop(&self) -> bool {
        self.compressed == 0
            && self.purged == 0
            && self.removed_temp == 0
            && self.pruned_dirs == 0
            && self.errors.is_empty()
    }

    fn fail(&mut self, path: &Path, reason: impl ToString) {
        let reason = reason.to_string();
        warn!(path = %path.display(), %reason, "artifact maintenance failed");
        self.errors.push(SweepFailure {
            path: path.to_path_buf(),
            reason,
        });
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CategoryInventory {
    pub raw_files: usize,
    pub raw_bytes: u64,
    pub compressed_files: usize,
    pub compressed_bytes: u64,
    pub temp_files: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

impl CategoryInventory {
    pub fn files(&self) -> usize {
        self.raw_files + self.compressed_files + self.temp_files
    }

    pub fn bytes(&self) -> u64 {
        self.raw_bytes + self.compressed_bytes
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ArtifactInventory {
    pub root: PathBuf,
    pub categories: BTreeMap<String, CategoryInventory>,
}

impl ArtifactInventory {
    pub fn total_files(&self) -> usize {
        self.categories.values().map(CategoryInventory::files).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.categories.values().map(CategoryInventory::bytes).sum()
    }
}

pub struct LogLifecycleManager {
    policy: RetentionPolicy,
}

impl LogLifecycleManager {
    pub fn new(policy: RetentionPolicy) -> Result<Self, EsError> {
        policy.validate()?;
        Ok(Self { policy })
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    pub fn compress(&self, category: &str, age: Duration) -> SweepReport {
        self.compress_at(category, age, SystemTime::now())
    }

    /// Compress raw artifacts of `category` older than `age` as seen from `now`.
    pub fn compress_at(&self, category: &str, age: Duration, now: SystemTime) -> SweepReport {
        let mut report = SweepReport::default();
        let threshold = age.max(self.policy.min_age());
        let Some(entries) = self.entries(category, &mut report) else {
            return report;
        };
        // Stale temp files first; this pass writes fresh ones.
        for entry in entries.iter().filter(|e| matches!(e.kind, FileKind::Temp)) {
            if age_of(entry, now) <= self.policy.min_age() {
                continue;
            }
            match fs::remove_file(&entry.path) {
                Ok(()) => {
                    debug!(path = %entry.path.display(), "removed stale temp file");
                    report.removed_temp += 1;
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => report.fail(&entry.path, err),
            }
        }
        for entry in entries.iter().filter(|e| matches!(e.kind, FileKind::Raw)) {
            if age_of(entry, now) <= threshold {
                continue;
            }
            match compress_file(entry, self.policy.compression_level) {
                Ok(new_size) => {
                    report.compressed += 1;
                    report.reclaimed_bytes += entry.size.saturating_sub(new_size);
                }
                Err(err) => report.fail(&entry.path, err),
            }
        }
        report
    }

    pub fn purge(&self, category: &str, age: Duration) -> SweepReport {
        self.purge_at(category, age, SystemTime::now())
    }

    /// Delete compressed artifacts of `category` older than `age`.
    pub fn purge_at(&self, category: &str, age: Duration, now: SystemTime) -> SweepReport {
        let mut report = SweepReport::default();
        let threshold = age.max(self.policy.min_age());
        let Some(entries) = self.entries(category, &mut report) else {
            return report;
        };
        for entry in entries {
            if !matches!(entry.kind, FileKind::Compressed) || age_of(&entry, now) <= threshold {
                continue;
            }
            match fs::remove_file(&entry.path) {
                Ok(()) => {
                    report.purged += 1;
                    report.reclaimed_bytes += entry.size;
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => report.fail(&entry.path, err),
            }
        }
        report
    }

    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(SystemTime::now())
    }

    /// Compress then purge every configured category and the screenshots
    /// directory, each with its own thresholds, then prune empty folders.
    pub fn sweep_at(&self, now: SystemTime) -> SweepReport {
        let mut report = SweepReport::default();
        for category in self.swept_categories() {
            let thresholds = self.policy.thresholds_for(&category).clone();
            report.merge(self.compress_at(&category, thresholds.compress_after(), now));
            report.merge(self.purge_at(&category, thresholds.purge_after(), now));
            let dir = self.policy.category_dir(&category);
            match scan::prune_dirs(&dir, true) {
                Ok(n) => report.pruned_dirs += n,
                Err(err) => report.fail(&dir, err),
            }
        }
        if report.is_noop() {
            debug!(root = %self.policy.root.display(), "sweep found nothing to do");
        } else {
            info!(
                compressed = report.compressed,
                purged = report.purged,
                removed_temp = report.removed_temp,
                pruned_dirs = report.pruned_dirs,
                reclaimed_bytes = report.reclaimed_bytes,
                errors = report.errors.len(),
                "artifact sweep finished"
            );
        }
        report
    }

    /// Counts and sizes per category directory under the root.
    pub fn inventory(&self) -> Result<ArtifactInventory, EsError> {
        let mut inventory = ArtifactInventory {
            root: self.policy.root.clone(),
            categories: BTreeMap::new(),
        };
        if !self.policy.root.is_dir() {
            return Ok(inventory);
        }
        let dirs = fs::read_dir(&self.policy.root).map_err(|err| EsError::io(&self.policy.root, err))?;
        for dir in dirs {
            let dir = dir.map_err(|err| EsError::io(&self.policy.root, err))?;
            let path = dir.path();
            if !path.is_dir() {
                continue;
            }
            let mut entries = Vec::new();
            scan::gather_entries(&path, &mut entries).map_err(|err| EsError::io(&path, err))?;
            let mut stats = CategoryInventory::default();
            for entry in &entries {
                match entry.kind {
                    FileKind::Raw => {
                        stats.raw_files += 1;
                        stats.raw_bytes += entry.size;
                    }
                    FileKind::Compressed => {
                        stats.compressed_files += 1;
                        stats.compressed_bytes += entry.size;
                    }
                    FileKind::Temp => stats.temp_files += 1,
                }
                let modified = DateTime::<Utc>::from(entry.modified);
                stats.oldest = Some(stats.oldest.map_or(modified, |o| o.min(modified)));
                stats.newest = Some(stats.newest.map_or(modified, |n| n.max(modified)));
            }
            let name = dir.file_name().to_string_lossy().into_owned();
            inventory.categories.insert(name, stats);
        }
        Ok(inventory)
    }

    /// Live artifacts of one category, oldest first.
    pub fn artifacts(&self, category: &str) -> Result<Vec<LogArtifact>, EsError> {
        let dir = self.policy.category_dir(category);
        let mut entries = Vec::new();
        scan::gather_entries(&dir, &mut entries).map_err(|err| EsError::io(&dir, err))?;
        let mut artifacts: Vec<LogArtifact> = entries
            .into_iter()
            .filter_map(|entry| {
                let state = entry.state()?;
                Some(LogArtifact {
                    category: category.to_string(),
                    modified: DateTime::<Utc>::from(entry.modified),
                    size: entry.size,
                    state,
                    path: entry.path,
                })
            })
            .collect();
        artifacts.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));
        Ok(artifacts)
    }

    /// Sweep on `interval` until `cancel` fires. The first sweep runs immediately.
    pub fn spawn_periodic(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let manager = Arc::clone(&self);
                        if let Err(err) = tokio::task::spawn_blocking(move || manager.sweep()).await {
                            warn!(error = %err, "periodic sweep task failed");
                        }
                    }
                }
            }
            debug!("periodic sweeper stopped");
        })
    }

    fn swept_categories(&self) -> Vec<String> {
        let mut categories = self.policy.categories.clone();
        if !categories.iter().any(|c| c == SCREENSHOTS_CATEGORY) {
            categories.push(SCREENSHOTS_CATEGORY.to_string());
        }
        categories
    }

    fn entries(&self, category: &str, report: &mut SweepReport) -> Option<Vec<FileEntry>> {
        let dir = self.policy.category_dir(category);
        let mut entries = Vec::new();
        match scan::gather_entries(&dir, &mut entries) {
            Ok(()) => Some(entries),
            Err(err) => {
                report.fail(&dir, err);
                None
            }
        }
    }
}

fn age_of(entry: &FileEntry, now: SystemTime) -> Duration {
    now.duration_since(entry.modified).unwrap_or(Duration::ZERO)
}

/// Raw -> Compressed through a temp file and a rename. The compressed file
/// carries the raw file's modification time.
fn compress_file(entry: &FileEntry, level: i32) -> Result<u64, EsError> {
    let target = scan::compressed_path(&entry.path);
    let tmp = scan::temp_path(&entry.path);
    let result = write_compressed(&entry.path, &tmp, entry.modified, level).and_then(|size| {
        fs::rename(&tmp, &target)?;
        fs::remove_file(&entry.path)?;
        Ok(size)
    });
    match result {
        Ok(size) => {
            debug!(
                from = %entry.path.display(),
                to = %target.display(),
                raw_bytes = entry.size,
                compressed_bytes = size,
                "compressed artifact"
            );
            Ok(size)
        }
        Err(err) => {
            let _ = fs::remove_file(&tmp);
            Err(EsErrorKind::CompressFailed {
                path: entry.path.display().to_string(),
                reason: err.to_string(),
            }
            .into())
        }
    }
}

fn write_compressed(src: &Path, tmp: &Path, modified: SystemTime, level: i32) -> io::Result<u64> {
    let mut input = File::open(src)?;
    let output = File::create(tmp)?;
    let mut encoder = Encoder::new(output, level)?;
    io::copy(&mut input, &mut encoder)?;
    let output = encoder.finish()?;
    output.sync_all()?;
    output.set_times(FileTimes::new().set_modified(modified))?;
    Ok(output.metadata()?.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn write_aged(path: &Path, body: &[u8], age: Duration, now: SystemTime) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
        let file = File::options().write(true).open(path).unwrap();
        file.set_times(FileTimes::new().set_modified(now - age)).unwrap();
    }

    fn manager(root: &Path) -> LogLifecycleManager {
        LogLifecycleManager::new(RetentionPolicy::default().with_root(root)).unwrap()
    }

    #[test]
    fn compresses_old_raw_and_keeps_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        let raw = dir.path().join("steps/2024-01-01/2024-01-01_steps.log");
        write_aged(&raw, b"line one\nline two\n", 2 * DAY, now);

        let report = manager(dir.path()).compress_at("steps", DAY, now);
        assert_eq!(report.compressed, 1);
        assert!(!raw.exists());

        let zst = scan::compressed_path(&raw);
        let meta = fs::metadata(&zst).unwrap();
        let expected = now - 2 * DAY;
        let drift = meta
            .modified()
            .unwrap()
            .duration_since(expected)
            .unwrap_or_else(|e| e.duration());
        assert!(drift < Duration::from_secs(1));

        let mut decoded = String::new();
        zstd::stream::Decoder::new(File::open(&zst).unwrap())
            .unwrap()
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, "line one\nline two\n");
    }

    #[test]
    fn young_files_are_never_touched() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        let raw = dir.path().join("steps/today.log");
        write_aged(&raw, b"fresh", Duration::from_secs(5), now);
        let tmp = dir.path().join("steps/inflight.log.zst.tmp");
        write_aged(&tmp, b"partial", Duration::from_secs(5), now);

        let mgr = manager(dir.path());
        let report = mgr.compress_at("steps", Duration::ZERO, now);
        assert_eq!(report.compressed, 0);
        assert_eq!(report.removed_temp, 0);
        assert!(raw.exists());
        assert!(tmp.exists());
    }

    #[test]
    fn purge_only_removes_compressed() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        let raw = dir.path().join("errors/old.log");
        let zst = dir.path().join("errors/older.log.zst");
        write_aged(&raw, b"raw", 30 * DAY, now);
        write_aged(&zst, b"zst", 30 * DAY, now);

        let report = manager(dir.path()).purge_at("errors", 7 * DAY, now);
        assert_eq!(report.purged, 1);
        assert!(raw.exists());
        assert!(!zst.exists());
    }

    #[test]
    fn sweep_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        write_aged(&dir.path().join("steps/d1/a.log"), b"a", 2 * DAY, now);
        write_aged(&dir.path().join("steps/d2/b.log"), b"b", 10 * DAY, now);
        write_aged(&dir.path().join("steps/d3/c.log"), b"c", Duration::from_secs(10), now);
        write_aged(&dir.path().join("screenshots/d1/error_x_101010.png"), b"png", 5 * DAY, now);

        let mgr = manager(dir.path());
        let first = mgr.sweep_at(now);
        assert_eq!(first.compressed, 3);
        assert_eq!(first.purged, 2);
        assert!(first.errors.is_empty());
        assert!(dir.path().join("steps/d1/a.log.zst").exists());
        assert!(!dir.path().join("steps/d2").exists());
        assert!(dir.path().join("steps/d3/c.log").exists());
        assert!(!dir.path().join("screenshots/d1").exists());

        let second = mgr.sweep_at(now);
        assert!(second.is_noop(), "{second:?}");
    }

    #[test]
    fn interrupted_compression_is_recovered() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        let raw = dir.path().join("sessions/x.log");
        write_aged(&raw, b"complete body", 2 * DAY, now);
        write_aged(&scan::temp_path(&raw), b"half", 2 * DAY, now);
        write_aged(&scan::compressed_path(&raw), b"stale twin", 2 * DAY, now);

        let report = manager(dir.path()).sweep_at(now);
        assert_eq!(report.removed_temp, 1);
        assert_eq!(report.compressed, 1);
        assert!(!raw.exists());

        let mut decoded = String::new();
        zstd::stream::Decoder::new(File::open(scan::compressed_path(&raw)).unwrap())
            .unwrap()
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, "complete body");
    }

    #[test]
    fn abandoned_screenshot_writes_are_removed_not_compressed() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        let partial = dir.path().join("screenshots/2024-01-01/error_login_120000.png.tmp");
        let done = dir.path().join("screenshots/2024-01-01/error_login_120001.png");
        write_aged(&partial, b"half a png", 2 * DAY, now);
        write_aged(&done, b"a png", 2 * DAY, now);

        let report = manager(dir.path()).sweep_at(now);
        assert_eq!(report.removed_temp, 1);
        assert_eq!(report.compressed, 1);
        assert!(!partial.exists());
        assert!(!scan::compressed_path(&partial).exists());
        assert!(scan::compressed_path(&done).exists());
    }

    #[test]
    fn inventory_and_artifacts_reflect_state() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        write_aged(&dir.path().join("steps/d/a.log"), b"12345", DAY, now);
        write_aged(&dir.path().join("steps/d/b.log.zst"), b"12", 3 * DAY, now);

        let mgr = manager(dir.path());
        let inventory = mgr.inventory().unwrap();
        let steps = &inventory.categories["steps"];
        assert_eq!(steps.raw_files, 1);
        assert_eq!(steps.raw_bytes, 5);
        assert_eq!(steps.compressed_files, 1);
        assert_eq!(inventory.total_bytes(), 7);

        let artifacts = mgr.artifacts("steps").unwrap();
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[0].state, ArtifactState::Compressed);
        assert_eq!(artifacts[1].state, ArtifactState::Raw);
    }

    #[test]
    fn missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir.path().join("nope"));
        assert!(mgr.sweep().is_noop());
        assert_eq!(mgr.inventory().unwrap().total_files(), 0);
    }

    #[tokio::test]
    async fn periodic_sweeper_runs_until_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        let raw = dir.path().join("steps/d/a.log");
        write_aged(&raw, b"a", 2 * DAY, now);

        let mgr = Arc::new(manager(dir.path()));
        let cancel = CancellationToken::new();
        let handle = mgr.spawn_periodic(Duration::from_millis(20), cancel.clone());

        let zst = scan::compressed_path(&raw);
        for _ in 0..200 {
            if zst.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(zst.exists());
        cancel.cancel();
        handle.await.unwrap();
    }
}
