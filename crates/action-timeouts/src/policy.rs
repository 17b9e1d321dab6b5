use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tuning knobs for [`crate::AdaptiveTimeoutEstimator`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutPolicy {
    /// Samples kept per context; oldest evicted first.
    pub window_capacity: usize,
    /// Below this many samples the caller's base timeout is returned untouched.
    pub min_samples: usize,
    /// Percentile (0, 1] taken over the window, nearest-rank.
    pub percentile: f64,
    /// Multiplier applied to the percentile.
    pub safety_margin: f64,
    pub floor_ms: u64,
    /// Contexts untouched for this long are dropped by `prune_idle`.
    pub idle_ttl_ms: u64,
    pub max_contexts: usize,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            window_capacity: 20,
            min_samples: 5,
            percentile: 0.95,
            safety_margin: 1.25,
            floor_ms: 500,
            idle_ttl_ms: 30 * 60 * 1000,
            max_contexts: 1024,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum TimeoutPolicyError {
    #[error("window_capacity must be at least 1")]
    EmptyWindow,
    #[error("min_samples must be between 1 and window_capacity ({capacity}), got {min_samples}")]
    MinSamples { min_samples: usize, capacity: usize },
    #[error("percentile must be in (0, 1], got {0}")]
    Percentile(f64),
    #[error("safety_margin must be a finite value >= 1.0, got {0}")]
    SafetyMargin(f64),
    #[error("max_contexts must be at least 1")]
    NoContexts,
}

impl TimeoutPolicy {
    pub fn floor(&self) -> Duration {
        Duration::from_millis(self.floor_ms)
    }

    pub fn idle_ttl(&self) -> Duration {
        Duration::from_millis(self.idle_ttl_ms)
    }

    pub fn validate(&self) -> Result<(), TimeoutPolicyError> {
        if self.window_capacity == 0 {
            return Err(TimeoutPolicyError::EmptyWindow);
        }
        if self.min_samples == 0 || self.min_samples > self.window_capacity {
            return Err(TimeoutPolicyError::MinSamples {
                min_samples: self.min_samples,
                capacity: self.window_capacity,
            });
        }
        if !(self.percentile > 0.0 && self.percentile <= 1.0) {
            return Err(TimeoutPolicyError::Percentile(self.percentile));
        }
        if !self.safety_margin.is_finite() || self.safety_margin < 1.0 {
            return Err(TimeoutPolicyError::SafetyMargin(self.safety_margin));
        }
        if self.max_contexts == 0 {
            return Err(TimeoutPolicyError::NoContexts);
        }
        Ok(())
    }
}
