use std::collections::HashMap;
use std::time::Duration;

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::warn;

/// Aggregate view of one operation name.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub name: String,
    pub count: u64,
    pub failures: u64,
    pub failure_rate: f64,
    pub mean_ms: f64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub max_ms: u64,
}

struct HistEntry {
    histogram: Histogram<u64>,
    sum_ms: u128,
    failures: u64,
}

impl HistEntry {
    fn new() -> Option<Self> {
        match Histogram::<u64>::new(3) {
            Ok(histogram) => Some(Self {
                histogram,
                sum_ms: 0,
                failures: 0,
            }),
            Err(err) => {
                warn!(error = %err, "failed to create histogram");
                None
            }
        }
    }

    fn snapshot(&self, name: &str) -> StatsSnapshot {
        let count = self.histogram.len();
        let (mean_ms, failure_rate) = if count == 0 {
            (0.0, 0.0)
        } else {
            (
                self.sum_ms as f64 / count as f64,
                self.failures as f64 / count as f64,
            )
        };
        StatsSnapshot {
            name: name.to_string(),
            count,
            failures: self.failures,
            failure_rate,
            mean_ms,
            p50_ms: self.histogram.value_at_quantile(0.5),
            p95_ms: self.histogram.value_at_quantile(0.95),
            max_ms: self.histogram.max(),
        }
    }
}

struct Cached {
    computed_at: Instant,
    snapshots: Vec<StatsSnapshot>,
}

/// Per-operation counters and latency histograms.
///
/// Readers get a snapshot that is recomputed at most once per TTL.
pub struct OperationStats {
    entries: Mutex<HashMap<String, HistEntry>>,
    cache: Mutex<Option<Cached>>,
    ttl: Duration,
}

impl OperationStats {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            cache: Mutex::new(None),
            ttl,
        }
    }

    pub fn record(&self, name: &str, duration: Duration, success: bool) {
        let mut entries = self.entries.lock();
        if !entries.contains_key(name) {
            let Some(entry) = HistEntry::new() else {
                return;
            };
            entries.insert(name.to_string(), entry);
        }
        let Some(entry) = entries.get_mut(name) else {
            return;
        };
        let ms = duration.as_millis().min(u64::MAX as u128) as u64;
        if let Err(err) = entry.histogram.record(ms) {
            warn!(operation = name, error = %err, "histogram record failed");
            return;
        }
        entry.sum_ms += ms as u128;
        if !success {
            entry.failures += 1;
        }
    }

    /// All operations, sorted by name.
    pub fn snapshot(&self) -> Vec<StatsSnapshot> {
        let now = Instant::now();
        let mut cache = self.cache.lock();
        if let Some(cached) = cache.as_ref() {
            if now.saturating_duration_since(cached.computed_at) < self.ttl {
                return cached.snapshots.clone();
            }
        }
        let mut snapshots: Vec<StatsSnapshot> = self
            .entries
            .lock()
            .iter()
            .map(|(name, entry)| entry.snapshot(name))
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        *cache = Some(Cached {
            computed_at: now,
            snapshots: snapshots.clone(),
        });
        snapshots
    }

    pub fn get(&self, name: &str) -> Option<StatsSnapshot> {
        self.snapshot().into_iter().find(|s| s.name == name)
    }

    pub fn invalidate(&self) {
        *self.cache.lock() = None;
    }
}
