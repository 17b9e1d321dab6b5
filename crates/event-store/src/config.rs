use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::EsError;

const HOUR_MS: u64 = 60 * 60 * 1000;
const DAY_MS: u64 = 24 * HOUR_MS;

/// Category that holds diagnostic screenshots.
pub const SCREENSHOTS_CATEGORY: &str = "screenshots";

/// Age thresholds for one class of artifacts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgeThresholds {
    pub compress_after_ms: u64,
    pub purge_after_ms: u64,
}

impl AgeThresholds {
    pub fn compress_after(&self) -> Duration {
        Duration::from_millis(self.compress_after_ms)
    }

    pub fn purge_after(&self) -> Duration {
        Duration::from_millis(self.purge_after_ms)
    }
}

impl Default for AgeThresholds {
    fn default() -> Self {
        Self {
            compress_after_ms: DAY_MS,
            purge_after_ms: 7 * DAY_MS,
        }
    }
}

/// Where artifacts live and when they age out.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    pub root: PathBuf,
    /// Log categories, one directory each under `root`.
    pub categories: Vec<String>,
    pub logs: AgeThresholds,
    pub screenshots: AgeThresholds,
    /// Nothing younger than this is touched by a sweep.
    pub min_age_ms: u64,
    pub sweep_interval_ms: u64,
    pub compression_level: i32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./logs"),
            categories: vec![
                "sessions".into(),
                "steps".into(),
                "locator".into(),
                "performance".into(),
                "errors".into(),
            ],
            logs: AgeThresholds::default(),
            screenshots: AgeThresholds {
                compress_after_ms: DAY_MS,
                purge_after_ms: 3 * DAY_MS,
            },
            min_age_ms: 60 * 1000,
            sweep_interval_ms: HOUR_MS,
            compression_level: 3,
        }
    }
}

impl RetentionPolicy {
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn min_age(&self) -> Duration {
        Duration::from_millis(self.min_age_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn category_dir(&self, category: &str) -> PathBuf {
        self.root.join(category)
    }

    pub fn screenshots_dir(&self) -> PathBuf {
        self.root.join(SCREENSHOTS_CATEGORY)
    }

    /// Thresholds that apply to `category`.
    pub fn thresholds_for(&self, category: &str) -> &AgeThresholds {
        if category == SCREENSHOTS_CATEGORY {
            &self.screenshots
        } else {
            &self.logs
        }
    }

    pub fn validate(&self) -> Result<(), EsError> {
        for category in &self.categories {
            if category.is_empty()
                || category.contains(['/', '\\'])
                || category == "."
                || category == ".."
            {
                return Err(EsError::invalid_policy(format!(
                    "bad category name '{category}'"
                )));
            }
        }
        for (name, t) in [("logs", &self.logs), ("screenshots", &self.screenshots)] {
            if t.purge_after_ms < t.compress_after_ms {
                return Err(EsError::invalid_policy(format!(
                    "{name}: purge_after_ms ({}) is below compress_after_ms ({})",
                    t.purge_after_ms, t.compress_after_ms
                )));
            }
        }
        if !(1..=22).contains(&self.compression_level) {
            return Err(EsError::invalid_policy(format!(
                "compression_level {} outside 1..=22",
                self.compression_level
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let policy = RetentionPolicy::default();
        assert!(policy.validate().is_ok());
        assert_eq!(policy.thresholds_for("screenshots").purge_after_ms, 3 * DAY_MS);
        assert_eq!(policy.thresholds_for("steps").purge_after_ms, 7 * DAY_MS);
    }

    #[test]
    fn purge_before_compress_is_rejected() {
        let mut policy = RetentionPolicy::default();
        policy.logs.purge_after_ms = 10;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn path_like_category_is_rejected() {
        let mut policy = RetentionPolicy::default();
        policy.categories.push("../etc".into());
        assert!(policy.validate().is_err());
    }
}
