use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ObserveError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObsPolicyView {
    /// Events at or below their class threshold are not persisted.
    pub default_threshold_ms: u64,
    /// Per-class overrides; the class is the operation name up to the first `:`.
    pub class_thresholds: BTreeMap<String, u64>,
    pub critical_classes: Vec<String>,
    /// Lower threshold applied to critical classes.
    pub critical_threshold_ms: u64,
    pub dedup_window_ms: u64,
    /// Identical events let through per window before suppression starts.
    pub max_duplicates: u32,
    /// While suppressing, every Nth repeat still gets through.
    pub repeat_every: u32,
    pub stats_ttl_ms: u64,
    pub summary_min_session_ms: u64,
    pub summary_min_slow_ops: u32,
    pub slowest_in_summary: usize,
    /// Category records are written under.
    pub event_category: String,
}

impl Default for ObsPolicyView {
    fn default() -> Self {
        Self {
            default_threshold_ms: 5_000,
            class_thresholds: BTreeMap::new(),
            critical_classes: vec!["run".into(), "step".into()],
            critical_threshold_ms: 1_500,
            dedup_window_ms: 10_000,
            max_duplicates: 3,
            repeat_every: 5,
            stats_ttl_ms: 5_000,
            summary_min_session_ms: 60_000,
            summary_min_slow_ops: 3,
            slowest_in_summary: 5,
            event_category: "performance".into(),
        }
    }
}

impl ObsPolicyView {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    pub fn stats_ttl(&self) -> Duration {
        Duration::from_millis(self.stats_ttl_ms)
    }

    pub fn threshold_for(&self, class: &str) -> Duration {
        let base = self
            .class_thresholds
            .get(class)
            .copied()
            .unwrap_or(self.default_threshold_ms);
        let ms = if self.critical_classes.iter().any(|c| c == class) {
            base.min(self.critical_threshold_ms)
        } else {
            base
        };
        Duration::from_millis(ms)
    }

    pub fn validate(&self) -> Result<(), ObserveError> {
        if self.repeat_every == 0 {
            return Err(ObserveError::InvalidPolicy("repeat_every must be >= 1".into()));
        }
        if self.event_category.trim().is_empty() {
            return Err(ObserveError::InvalidPolicy("event_category is empty".into()));
        }
        Ok(())
    }
}

/// Operation class: the name up to the first `:`.
pub fn operation_class(name: &str) -> &str {
    name.split_once(':').map_or(name, |(class, _)| class)
}
