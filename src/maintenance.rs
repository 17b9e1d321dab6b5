//! Maintenance reporting

use std::fmt::Write as _;

use action_locator::{ResolverStatsSnapshot, SelectorCacheEntry};
use chrono::{DateTime, Utc};
use l6_observe::{SessionSummary, StatsSnapshot};
use serde::Serialize;
use stepwise_event_store::{ArtifactInventory, SweepReport};

use crate::diagnostics::ScreenshotSummary;

#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceReport {
    pub generated_at: DateTime<Utc>,
    pub resolver: Option<ResolverStatsSnapshot>,
    pub selector_cache: Vec<SelectorCacheEntry>,
    pub operations: Vec<StatsSnapshot>,
    pub session: SessionSummary,
    pub estimator_contexts: usize,
    pub artifacts: ArtifactInventory,
    pub screenshots: ScreenshotSummary,
}

impl MaintenanceReport {
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Maintenance report ({})", self.generated_at.format("%Y-%m-%d %H:%M:%S UTC"));
        let _ = writeln!(out, "  root: {}", self.artifacts.root.display());
        let _ = writeln!(
            out,
            "  artifacts: {} file(s), {}",
            self.artifacts.total_files(),
            human_bytes(self.artifacts.total_bytes())
        );
        for (category, inv) in &self.artifacts.categories {
            let _ = writeln!(
                out,
                "    {category:<12} raw {:>4} ({:>9})  zst {:>4} ({:>9})  tmp {}",
                inv.raw_files,
                human_bytes(inv.raw_bytes),
                inv.compressed_files,
                human_bytes(inv.compressed_bytes),
                inv.temp_files
            );
        }
        let shots = &self.screenshots;
        let _ = writeln!(
            out,
            "  screenshots: {} (error {}, step {}, success {}, other {})",
            shots.total(),
            shots.error,
            shots.step,
            shots.success,
            shots.other
        );
        if let Some(resolver) = &self.resolver {
            let _ = writeln!(
                out,
                "  resolver: {} cache hit(s), {} miss(es), {} race(s), {} not found, {} eviction(s)",
                resolver.cache_hits,
                resolver.cache_misses,
                resolver.races,
                resolver.not_found,
                resolver.evictions
            );
        }
        let _ = writeln!(out, "  cached selectors: {}", self.selector_cache.len());
        let _ = writeln!(out, "  estimator contexts: {}", self.estimator_contexts);
        let _ = writeln!(
            out,
            "  session: {} operation(s), {} failed, {} slow",
            self.session.operations, self.session.failed_operations, self.session.slow_operations
        );
        for op in &self.operations {
            let _ = writeln!(
                out,
                "    {:<32} n={:<5} fail={:<4} p50={}ms p95={}ms max={}ms",
                op.name, op.count, op.failures, op.p50_ms, op.p95_ms, op.max_ms
            );
        }
        out
    }
}

pub fn render_sweep(report: &SweepReport) -> String {
    let mut out = format!(
        "Sweep: {} compressed, {} purged, {} temp removed, {} dir(s) pruned, {} reclaimed",
        report.compressed,
        report.purged,
        report.removed_temp,
        report.pruned_dirs,
        human_bytes(report.reclaimed_bytes)
    );
    for failure in &report.errors {
        let _ = write!(out, "\n  ! {}: {}", failure.path.display(), failure.reason);
    }
    out
}

pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
