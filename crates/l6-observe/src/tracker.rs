//! Operation tracking
//!
//! Every tracked scope produces a [`PerformanceEvent`] when it ends. The event
//! always feeds the aggregates and, on success, the timeout estimator. It is
//! persisted only when it crosses its class threshold and then survives the
//! duplicate filter; fast events never reach the filter.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use action_timeouts::AdaptiveTimeoutEstimator;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use stepwise_event_store::{EventSink, LogRecord, Severity};
use tokio::time::Instant;
use tracing::{debug, warn, Instrument, Span};

use crate::dedup::{DedupVerdict, DuplicateFilter};
use crate::errors::ObserveError;
use crate::event::{PerformanceEvent, SessionSummary};
use crate::metrics::{OperationStats, StatsSnapshot};
use crate::policy::{operation_class, ObsPolicyView};
use crate::tracing::{observe_latency, op_span};

tokio::task_local! {
    static SCOPE_DEPTH: usize;
}

struct SessionState {
    started: Instant,
    started_wall: DateTime<Utc>,
    operations: u64,
    tracked: Duration,
    failed_operations: u64,
    slow_operations: u32,
    persisted: u64,
    suppressed: u64,
}

struct TrackerInner {
    policy: ObsPolicyView,
    sink: Arc<dyn EventSink>,
    estimator: Option<Arc<AdaptiveTimeoutEstimator>>,
    dedup: Mutex<DuplicateFilter>,
    stats: OperationStats,
    session: Mutex<SessionState>,
}

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PerformanceTracker {
    inner: Arc<TrackerInner>,
}

impl PerformanceTracker {
    pub fn new(
        policy: ObsPolicyView,
        sink: Arc<dyn EventSink>,
        estimator: Option<Arc<AdaptiveTimeoutEstimator>>,
    ) -> Result<Self, ObserveError> {
        policy.validate()?;
        let dedup = DuplicateFilter::new(
            policy.dedup_window(),
            policy.max_duplicates,
            policy.repeat_every,
        );
        let stats = OperationStats::new(policy.stats_ttl());
        Ok(Self {
            inner: Arc::new(TrackerInner {
                policy,
                sink,
                estimator,
                dedup: Mutex::new(dedup),
                stats,
                session: Mutex::new(SessionState {
                    started: Instant::now(),
                    started_wall: Utc::now(),
                    operations: 0,
                    tracked: Duration::ZERO,
                    failed_operations: 0,
                    slow_operations: 0,
                    persisted: 0,
                    suppressed: 0,
                }),
            }),
        })
    }

    pub fn policy(&self) -> &ObsPolicyView {
        &self.inner.policy
    }

    pub fn estimator(&self) -> Option<&Arc<AdaptiveTimeoutEstimator>> {
        self.inner.estimator.as_ref()
    }

    /// Open a scope nested under whatever scope the current task is running
    /// within (see [`TrackScope::run_within`]), or a top-level one.
    pub fn track(&self, name: impl Into<String>) -> TrackScope {
        let depth = SCOPE_DEPTH.try_with(|d| *d).unwrap_or(0);
        self.track_nested(name, depth)
    }

    /// Open a scope at an explicit nesting depth. Only depth 0 counts toward
    /// the session totals.
    pub fn track_nested(&self, name: impl Into<String>, depth: usize) -> TrackScope {
        let name = name.into();
        TrackScope {
            tracker: self.clone(),
            span: op_span(&name, depth),
            name,
            depth,
            started: Instant::now(),
            started_wall: Utc::now(),
            done: false,
        }
    }

    /// Track a fallible future; `Ok` marks success, `Err` failure.
    pub async fn measure<T, E, F>(&self, name: impl Into<String>, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let scope = self.track(name);
        match scope.run_within(fut).await {
            Ok(value) => {
                scope.succeed();
                Ok(value)
            }
            Err(err) => {
                scope.fail(&err);
                Err(err)
            }
        }
    }

    pub fn stats(&self, name: &str) -> Option<StatsSnapshot> {
        self.inner.stats.get(name)
    }

    pub fn all_stats(&self) -> Vec<StatsSnapshot> {
        self.inner.stats.snapshot()
    }

    pub fn session_summary(&self) -> SessionSummary {
        self.inner.stats.invalidate();
        let all = self.inner.stats.snapshot();
        let limit = self.inner.policy.slowest_in_summary;

        let mut slowest = all.clone();
        slowest.sort_by(|a, b| b.mean_ms.total_cmp(&a.mean_ms));
        slowest.truncate(limit);

        let mut most_failures: Vec<StatsSnapshot> =
            all.into_iter().filter(|s| s.failures > 0).collect();
        most_failures.sort_by(|a, b| b.failures.cmp(&a.failures));
        most_failures.truncate(limit);

        let session = self.inner.session.lock();
        SessionSummary {
            started_at: session.started_wall,
            session_ms: as_ms(session.started.elapsed()),
            operations: session.operations,
            tracked_ms: as_ms(session.tracked),
            failed_operations: session.failed_operations,
            slow_operations: session.slow_operations,
            persisted: session.persisted,
            suppressed: session.suppressed,
            slowest,
            most_failures,
        }
    }

    /// Write one consolidated record if the session was long or had enough
    /// slow operations. Returns whether a record was written.
    pub fn emit_session_summary(&self) -> bool {
        let summary = self.session_summary();
        let policy = &self.inner.policy;
        let worth_it = summary.session_ms >= policy.summary_min_session_ms
            || summary.slow_operations >= policy.summary_min_slow_ops;
        if !worth_it {
            debug!(
                session_ms = summary.session_ms,
                slow = summary.slow_operations,
                "session summary below thresholds"
            );
            return false;
        }
        let slowest = summary
            .slowest
            .iter()
            .map(|s| format!("{}={:.0}ms", s.name, s.mean_ms))
            .collect::<Vec<_>>()
            .join(",");
        let failing = summary
            .most_failures
            .iter()
            .map(|s| format!("{}={}", s.name, s.failures))
            .collect::<Vec<_>>()
            .join(",");
        let record = LogRecord::new(
            policy.event_category.clone(),
            Severity::Info,
            format!(
                "session summary: {} operations in {:.1}s, {} slow, {} failed",
                summary.operations,
                summary.session_ms as f64 / 1000.0,
                summary.slow_operations,
                summary.failed_operations
            ),
        )
        .with_field("session_ms", summary.session_ms)
        .with_field("tracked_ms", summary.tracked_ms)
        .with_field("suppressed", summary.suppressed)
        .with_field("slowest", slowest)
        .with_field("most_failures", failing);
        match self.inner.sink.append(&record) {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "failed to write session summary");
                false
            }
        }
    }

    fn complete(&self, scope: &TrackScope, success: bool, error: Option<String>) -> PerformanceEvent {
        let inner = &self.inner;
        let duration = scope.started.elapsed();
        let class = operation_class(&scope.name).to_string();
        let significant = duration > inner.policy.threshold_for(&class);

        inner.stats.record(&scope.name, duration, success);
        if success {
            if let Some(estimator) = &inner.estimator {
                estimator.record_sample(&scope.name, duration);
            }
        }
        {
            let mut session = inner.session.lock();
            if scope.depth == 0 {
                session.operations += 1;
                session.tracked += duration;
            }
            if !success {
                session.failed_operations += 1;
            }
            if significant {
                session.slow_operations += 1;
            }
        }
        observe_latency(&scope.span, as_ms(duration));
        debug!(
            operation = %scope.name,
            depth = scope.depth,
            duration_ms = as_ms(duration),
            success,
            "operation finished"
        );

        let mut event = PerformanceEvent {
            name: scope.name.clone(),
            class,
            started_at: scope.started_wall,
            ended_at: Utc::now(),
            duration,
            success,
            significant,
            persisted: false,
            depth: scope.depth,
            error,
        };

        if !significant {
            return event;
        }
        let key = format!("{}|{}", event.name, if success { "ok" } else { "fail" });
        let verdict = inner.dedup.lock().check(&key);
        if verdict == DedupVerdict::Suppress {
            inner.session.lock().suppressed += 1;
            return event;
        }
        event.persisted = self.persist(&event, verdict);
        event
    }

    fn persist(&self, event: &PerformanceEvent, verdict: DedupVerdict) -> bool {
        let inner = &self.inner;
        let secs = event.duration.as_secs_f64();
        let mut message = match &event.error {
            Some(err) if !event.success => format!("{} failed after {:.2}s: {}", event.name, secs, err),
            _ => format!("{} took {:.2}s", event.name, secs),
        };
        if let DedupVerdict::Repeated(n) = verdict {
            message = format!("[repeated {n}x] {message}");
        }
        let severity = if event.success {
            Severity::Warn
        } else {
            Severity::Error
        };
        let mut record = LogRecord::new(inner.policy.event_category.clone(), severity, message)
            .at(event.ended_at)
            .with_field("op", &event.name)
            .with_field("class", &event.class)
            .with_field("duration_ms", event.duration_ms())
            .with_field("depth", event.depth)
            .with_field("success", event.success);
        if let Some(err) = &event.error {
            record = record.with_field("error", err);
        }
        match inner.sink.append(&record) {
            Ok(()) => {
                inner.session.lock().persisted += 1;
                true
            }
            Err(err) => {
                warn!(operation = %event.name, error = %err, "performance event dropped");
                false
            }
        }
    }
}

/// Live tracked operation. End it with [`TrackScope::succeed`] or
/// [`TrackScope::fail`]; dropping it unfinished records a failure.
pub struct TrackScope {
    tracker: PerformanceTracker,
    name: String,
    depth: usize,
    started: Instant,
    started_wall: DateTime<Utc>,
    span: Span,
    done: bool,
}

impl TrackScope {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn child(&self, name: impl Into<String>) -> TrackScope {
        self.tracker.track_nested(name, self.depth + 1)
    }

    /// Drive `fut` so that scopes opened inside it nest under this one.
    pub async fn run_within<F: Future>(&self, fut: F) -> F::Output {
        SCOPE_DEPTH
            .scope(self.depth + 1, fut.instrument(self.span.clone()))
            .await
    }

    pub fn succeed(mut self) -> PerformanceEvent {
        self.done = true;
        self.tracker.complete(&self, true, None)
    }

    pub fn fail(mut self, error: impl fmt::Display) -> PerformanceEvent {
        self.done = true;
        self.tracker.complete(&self, false, Some(error.to_string()))
    }
}

impl Drop for TrackScope {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        let reason = if std::thread::panicking() {
            "panicked"
        } else {
            "ended without outcome"
        };
        let tracker = self.tracker.clone();
        tracker.complete(self, false, Some(reason.to_string()));
    }
}

fn as_ms(d: Duration) -> u64 {
    d.as_millis().min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use action_timeouts::TimeoutPolicy;
    use stepwise_event_store::{EsError, EsErrorKind, MemoryEventSink};

    fn tracker_with(policy: ObsPolicyView) -> (PerformanceTracker, Arc<MemoryEventSink>) {
        let sink = Arc::new(MemoryEventSink::new());
        let tracker = PerformanceTracker::new(policy, sink.clone(), None).unwrap();
        (tracker, sink)
    }

    async fn run_for(tracker: &PerformanceTracker, name: &str, d: Duration, ok: bool) -> PerformanceEvent {
        let scope = tracker.track(name);
        tokio::time::advance(d).await;
        if ok {
            scope.succeed()
        } else {
            scope.fail("element not found")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn only_significant_events_are_persisted() {
        let (tracker, sink) = tracker_with(ObsPolicyView::default());

        let fast = run_for(&tracker, "export:orders", Duration::from_millis(1), true).await;
        assert!(!fast.significant);
        assert!(sink.is_empty());

        let slow = run_for(&tracker, "export:orders", Duration::from_secs(6), true).await;
        assert!(slow.significant && slow.persisted);
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].category, "performance");
        assert_eq!(records[0].field("duration_ms"), Some("6000"));
    }

    #[tokio::test(start_paused = true)]
    async fn critical_class_uses_lower_threshold() {
        let (tracker, sink) = tracker_with(ObsPolicyView::default());
        run_for(&tracker, "step:submit", Duration::from_secs(2), true).await;
        run_for(&tracker, "misc:poll", Duration::from_secs(2), true).await;
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].field("op"), Some("step:submit"));
    }

    #[tokio::test(start_paused = true)]
    async fn nested_scopes_are_not_double_counted() {
        let (tracker, _sink) = tracker_with(ObsPolicyView::default());
        let parent = tracker.track("run:checkout");
        let child = parent.child("step:login");
        assert_eq!(child.depth(), 1);
        tokio::time::advance(Duration::from_millis(300)).await;
        child.succeed();
        tokio::time::advance(Duration::from_millis(200)).await;
        parent.succeed();

        let summary = tracker.session_summary();
        assert_eq!(summary.operations, 1);
        assert_eq!(summary.tracked_ms, 500);
        assert_eq!(tracker.stats("step:login").unwrap().count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ambient_depth_follows_run_within() {
        let (tracker, _sink) = tracker_with(ObsPolicyView::default());
        let run = tracker.track("run:nightly");
        let inner_depths = run
            .run_within(async {
                let step = tracker.track("step:open");
                let depth = step.depth();
                let nested = step.run_within(async { tracker.track("locate:menu").depth() }).await;
                step.succeed();
                (depth, nested)
            })
            .await;
        run.succeed();
        assert_eq!(inner_depths, (1, 2));
        assert_eq!(tracker.track("after").depth(), 0);
        assert_eq!(tracker.session_summary().operations, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_scope_counts_as_failure() {
        let (tracker, _sink) = tracker_with(ObsPolicyView::default());
        {
            let _scope = tracker.track("locate:menu");
        }
        let stats = tracker.stats("locate:menu").unwrap();
        assert_eq!(stats.failures, 1);
        assert_eq!(tracker.session_summary().failed_operations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_durations_feed_the_estimator() {
        let estimator = Arc::new(AdaptiveTimeoutEstimator::new(TimeoutPolicy::default()));
        let sink = Arc::new(MemoryEventSink::new());
        let tracker =
            PerformanceTracker::new(ObsPolicyView::default(), sink, Some(estimator.clone())).unwrap();

        for _ in 0..5 {
            run_for(&tracker, "locate:submit", Duration::from_millis(800), true).await;
        }
        run_for(&tracker, "locate:submit", Duration::from_secs(9), false).await;

        assert_eq!(estimator.sample_count("locate:submit"), 5);
        assert_eq!(
            estimator.get_timeout("locate:submit", Duration::from_secs(10)),
            Duration::from_millis(1000)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_failures_are_collapsed() {
        let (tracker, sink) = tracker_with(ObsPolicyView {
            dedup_window_ms: 60_000,
            ..ObsPolicyView::default()
        });
        for _ in 0..10 {
            run_for(&tracker, "step:upload", Duration::from_secs(2), false).await;
        }
        let records = sink.records();
        assert_eq!(records.len(), 5);
        assert!(records[3].message.starts_with("[repeated 5x]"));
        assert!(records[4].message.starts_with("[repeated 10x]"));
        assert_eq!(tracker.session_summary().suppressed, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn fast_runs_do_not_hide_the_first_slow_one() {
        let (tracker, sink) = tracker_with(ObsPolicyView::default());
        for _ in 0..3 {
            run_for(&tracker, "export:orders", Duration::from_millis(5), true).await;
        }
        let slow = run_for(&tracker, "export:orders", Duration::from_secs(8), true).await;
        assert!(slow.significant);
        assert!(slow.persisted);
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "export:orders took 8.00s");
        assert_eq!(tracker.session_summary().suppressed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn measure_marks_outcome_from_result() {
        let (tracker, _sink) = tracker_with(ObsPolicyView::default());
        let ok: Result<u32, String> = tracker.measure("calc:ok", async { Ok(7) }).await;
        assert_eq!(ok, Ok(7));
        let err: Result<u32, String> = tracker
            .measure("calc:err", async { Err("nope".to_string()) })
            .await;
        assert!(err.is_err());
        assert_eq!(tracker.stats("calc:err").unwrap().failures, 1);
        assert_eq!(tracker.stats("calc:ok").unwrap().failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn session_summary_emitted_only_past_thresholds() {
        let (tracker, sink) = tracker_with(ObsPolicyView::default());
        run_for(&tracker, "step:a", Duration::from_millis(10), true).await;
        assert!(!tracker.emit_session_summary());
        assert!(sink.is_empty());

        for name in ["step:a", "step:b", "step:c"] {
            run_for(&tracker, name, Duration::from_secs(2), true).await;
        }
        assert!(tracker.emit_session_summary());
        let last = sink.records().pop().unwrap();
        assert!(last.message.starts_with("session summary: 4 operations"));
        assert!(last.field("slowest").unwrap().contains("step:"));
    }

    struct FailingSink;

    impl EventSink for FailingSink {
        fn append(&self, _record: &LogRecord) -> Result<(), EsError> {
            Err(EsErrorKind::AppendRejected("disk full".into()).into())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sink_errors_are_swallowed() {
        let tracker =
            PerformanceTracker::new(ObsPolicyView::default(), Arc::new(FailingSink), None).unwrap();
        let event = run_for(&tracker, "export:x", Duration::from_secs(7), true).await;
        assert!(event.significant);
        assert!(!event.persisted);
        assert_eq!(tracker.session_summary().persisted, 0);
    }
}
