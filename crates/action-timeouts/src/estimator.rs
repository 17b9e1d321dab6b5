//! Rolling-window timeout estimator

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::policy::TimeoutPolicy;
use crate::window::{nearest_rank, SampleWindow};

/// Summary of one context's window.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WindowStats {
    pub context: String,
    pub count: usize,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub max_ms: u64,
}

/// Learns per-context timeouts from recent durations.
///
/// Samples are recorded by the performance tracker once an operation
/// completes; callers ask for a timeout right before starting the next one.
pub struct AdaptiveTimeoutEstimator {
    policy: TimeoutPolicy,
    windows: Mutex<HashMap<String, SampleWindow>>,
}

impl AdaptiveTimeoutEstimator {
    pub fn new(policy: TimeoutPolicy) -> Self {
        Self {
            policy,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &TimeoutPolicy {
        &self.policy
    }

    pub fn record_sample(&self, context: &str, duration: Duration) {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        if !windows.contains_key(context) && windows.len() >= self.policy.max_contexts {
            evict_least_recent(&mut windows);
        }
        windows
            .entry(context.to_string())
            .or_insert_with(|| SampleWindow::new(self.policy.window_capacity, now))
            .push(duration, now);
    }

    /// Timeout for `context`, never above `base`.
    ///
    /// With fewer than `min_samples` observations `base` comes back unchanged.
    /// Otherwise the configured percentile times the safety margin, clamped
    /// to `[floor, base]`. A `base` below the floor is returned as is.
    pub fn get_timeout(&self, context: &str, base: Duration) -> Duration {
        let floor = self.policy.floor();
        let mut windows = self.windows.lock();
        let Some(window) = windows.get_mut(context) else {
            return base;
        };
        window.touch(Instant::now());
        if window.len() < self.policy.min_samples || base <= floor {
            return base;
        }
        let Some(pct) = window.percentile(self.policy.percentile) else {
            return base;
        };
        let scaled = Duration::try_from_secs_f64(pct.as_secs_f64() * self.policy.safety_margin)
            .unwrap_or(base);
        let estimate = scaled.clamp(floor, base);
        debug!(
            context,
            samples = window.len(),
            p_ms = pct.as_millis() as u64,
            estimate_ms = estimate.as_millis() as u64,
            "adaptive timeout"
        );
        estimate
    }

    pub fn sample_count(&self, context: &str) -> usize {
        self.windows.lock().get(context).map_or(0, SampleWindow::len)
    }

    pub fn context_count(&self) -> usize {
        self.windows.lock().len()
    }

    pub fn window_stats(&self, context: &str) -> Option<WindowStats> {
        let windows = self.windows.lock();
        let window = windows.get(context)?;
        let sorted = window.sorted_durations();
        let as_ms = |d: Option<Duration>| d.map_or(0, |d| d.as_millis() as u64);
        Some(WindowStats {
            context: context.to_string(),
            count: sorted.len(),
            p50_ms: as_ms(nearest_rank(&sorted, 0.5)),
            p95_ms: as_ms(nearest_rank(&sorted, 0.95)),
            max_ms: as_ms(sorted.last().copied()),
        })
    }

    pub fn prune_idle(&self) -> usize {
        self.prune_idle_at(Instant::now())
    }

    /// Drops contexts not touched within `idle_ttl` of `now`.
    pub fn prune_idle_at(&self, now: Instant) -> usize {
        let ttl = self.policy.idle_ttl();
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, w| now.saturating_duration_since(w.last_touched()) <= ttl);
        let pruned = before - windows.len();
        if pruned > 0 {
            debug!(pruned, remaining = windows.len(), "pruned idle timing contexts");
        }
        pruned
    }
}

fn evict_least_recent(windows: &mut HashMap<String, SampleWindow>) {
    let oldest = windows
        .iter()
        .min_by_key(|(_, w)| w.last_touched())
        .map(|(k, _)| k.clone());
    if let Some(key) = oldest {
        windows.remove(&key);
    }
}
