//! Per-run service wiring
//!
//! Everything a run needs is built here once and shared through `Arc`s;
//! nothing lives in process-wide statics.

use std::sync::Arc;

use action_flow::{DiagnosticCapture, StepCoordinator};
use action_locator::{DefaultElementResolver, ElementResolver, ProbePort, SelectorCache};
use action_timeouts::AdaptiveTimeoutEstimator;
use anyhow::{Context, Result};
use chrono::Utc;
use l6_observe::PerformanceTracker;
use stepwise_event_store::{EventSink, FileEventSink, LogLifecycleManager};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::AppConfig;
use crate::diagnostics::screenshot_summary;
use crate::maintenance::MaintenanceReport;

pub struct RunServices {
    config: AppConfig,
    estimator: Arc<AdaptiveTimeoutEstimator>,
    cache: Arc<SelectorCache>,
    sink: Arc<dyn EventSink>,
    tracker: PerformanceTracker,
    lifecycle: Arc<LogLifecycleManager>,
    resolver: Option<Arc<DefaultElementResolver>>,
}

impl RunServices {
    /// Persist events under the configured retention root.
    pub fn new(config: AppConfig) -> Result<Self> {
        let sink = Arc::new(FileEventSink::new(config.retention.root.clone()));
        Self::with_sink(config, sink)
    }

    pub fn with_sink(config: AppConfig, sink: Arc<dyn EventSink>) -> Result<Self> {
        config.validate().context("invalid configuration")?;
        let estimator = Arc::new(AdaptiveTimeoutEstimator::new(config.timeouts.clone()));
        let cache = Arc::new(SelectorCache::new(config.locator.max_failure_streak));
        let tracker = PerformanceTracker::new(
            config.observe.clone(),
            Arc::clone(&sink),
            Some(Arc::clone(&estimator)),
        )
        .context("failed to build performance tracker")?;
        let lifecycle = Arc::new(
            LogLifecycleManager::new(config.retention.clone())
                .context("failed to build lifecycle manager")?,
        );
        info!(root = %config.retention.root.display(), "run services ready");
        Ok(Self {
            config,
            estimator,
            cache,
            sink,
            tracker,
            lifecycle,
            resolver: None,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn estimator(&self) -> &Arc<AdaptiveTimeoutEstimator> {
        &self.estimator
    }

    pub fn cache(&self) -> &Arc<SelectorCache> {
        &self.cache
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    pub fn tracker(&self) -> &PerformanceTracker {
        &self.tracker
    }

    pub fn lifecycle(&self) -> &Arc<LogLifecycleManager> {
        &self.lifecycle
    }

    pub fn resolver(&self) -> Option<&Arc<DefaultElementResolver>> {
        self.resolver.as_ref()
    }

    /// Build the resolver around the driver's probe. Replaces any earlier one;
    /// the selector cache is kept.
    pub fn attach_probe(&mut self, probe: Arc<dyn ProbePort>) -> Arc<DefaultElementResolver> {
        let resolver = Arc::new(DefaultElementResolver::new(
            probe,
            Arc::clone(&self.cache),
            Arc::clone(&self.estimator),
            self.tracker.clone(),
            self.config.locator.clone(),
        ));
        self.resolver = Some(Arc::clone(&resolver));
        resolver
    }

    pub fn coordinator(&self) -> StepCoordinator {
        let mut coordinator = StepCoordinator::new(self.tracker.clone(), self.config.run.clone())
            .with_failure_sink(Arc::clone(&self.sink));
        if let Some(resolver) = &self.resolver {
            let resolver: Arc<dyn ElementResolver> = resolver.clone();
            coordinator = coordinator.with_resolver(resolver);
        }
        coordinator
    }

    pub fn coordinator_with_diagnostics(
        &self,
        diagnostics: Arc<dyn DiagnosticCapture>,
    ) -> StepCoordinator {
        self.coordinator().with_diagnostics(diagnostics)
    }

    pub fn spawn_sweeper(&self, cancel: CancellationToken) -> JoinHandle<()> {
        Arc::clone(&self.lifecycle).spawn_periodic(self.config.retention.sweep_interval(), cancel)
    }

    pub fn maintenance_report(&self) -> Result<MaintenanceReport> {
        let artifacts = self
            .lifecycle
            .inventory()
            .context("failed to take artifact inventory")?;
        let screenshots = screenshot_summary(&self.config.retention.screenshots_dir())
            .context("failed to count screenshots")?;
        Ok(MaintenanceReport {
            generated_at: Utc::now(),
            resolver: self.resolver.as_ref().map(|r| r.stats()),
            selector_cache: self.cache.snapshot(),
            operations: self.tracker.all_stats(),
            session: self.tracker.session_summary(),
            estimator_contexts: self.estimator.context_count(),
            artifacts,
            screenshots,
        })
    }

    /// Flush the sink and persist the session summary when it is worth it.
    pub fn finish(&self) -> bool {
        let emitted = self.tracker.emit_session_summary();
        if let Err(err) = self.sink.flush() {
            tracing::warn!(error = %err, "failed to flush event sink");
        }
        emitted
    }
}
