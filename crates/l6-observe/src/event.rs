use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Completed operation as seen by the tracker.
#[derive(Clone, Debug, Serialize)]
pub struct PerformanceEvent {
    pub name: String,
    pub class: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration: Duration,
    pub success: bool,
    /// Crossed its class threshold.
    pub significant: bool,
    /// Actually written to the sink (significant and not suppressed).
    pub persisted: bool,
    pub depth: usize,
    pub error: Option<String>,
}

impl PerformanceEvent {
    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis().min(u64::MAX as u128) as u64
    }
}

/// Aggregated session view.
#[derive(Clone, Debug, Serialize)]
pub struct SessionSummary {
    pub started_at: DateTime<Utc>,
    pub session_ms: u64,
    /// Top-level operations only.
    pub operations: u64,
    pub tracked_ms: u64,
    pub failed_operations: u64,
    pub slow_operations: u32,
    pub persisted: u64,
    pub suppressed: u64,
    pub slowest: Vec<crate::metrics::StatsSnapshot>,
    pub most_failures: Vec<crate::metrics::StatsSnapshot>,
}
