//! End to end: real resolver, coordinator and tracker wired by `RunServices`,
//! driven by a scripted page under paused time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use action_flow::{
    BackoffSchedule, ExecutionPlan, RetryPolicy, RunStatus, StepContext, StepDefinition,
    StepError, StepExecutor, StepOutcome, StepOutput,
};
use action_locator::{ElementRef, Locator, LocatorError, LocatorSet, ProbeCtx, ProbePort};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use stepwise_cli::{AppConfig, RunServices};
use stepwise_event_store::MemoryEventSink;
use tokio::time::{sleep, Instant};

/// Elements become visible at a fixed instant; every probe costs `latency`.
struct ScriptedPage {
    latency: Duration,
    visible_from: Mutex<HashMap<String, Instant>>,
    calls: Mutex<HashMap<String, u32>>,
}

impl ScriptedPage {
    fn new(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            visible_from: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        })
    }

    fn show(&self, locator: &str, after: Duration) {
        self.visible_from
            .lock()
            .insert(locator.to_string(), Instant::now() + after);
    }

    fn calls(&self, locator: &str) -> u32 {
        self.calls.lock().get(locator).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ProbePort for ScriptedPage {
    async fn probe(&self, locator: &Locator, _ctx: ProbeCtx) -> Result<ElementRef, LocatorError> {
        let key = locator.to_string();
        *self.calls.lock().entry(key.clone()).or_default() += 1;
        sleep(self.latency).await;
        let visible = self
            .visible_from
            .lock()
            .get(&key)
            .is_some_and(|from| Instant::now() >= *from);
        if visible {
            Ok(ElementRef(format!("node:{key}")))
        } else {
            Err(LocatorError::ProbeFailed {
                locator: key,
                reason: "no match".into(),
            })
        }
    }
}

struct Click {
    target: LocatorSet,
}

#[async_trait]
impl StepExecutor for Click {
    async fn execute(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let resolved = ctx
            .locate(&self.target, Instant::now() + Duration::from_secs(1))
            .await?;
        Ok(StepOutput::new()
            .with("locator", resolved.locator.to_string())
            .with("from_cache", resolved.from_cache()))
    }
}

struct Noop;

#[async_trait]
impl StepExecutor for Noop {
    async fn execute(&self, _ctx: &StepContext) -> Result<StepOutput, StepError> {
        Ok(StepOutput::new())
    }
}

fn save_button() -> LocatorSet {
    LocatorSet::new(
        "save_button",
        vec![Locator::css("#save"), Locator::text("Save")],
    )
}

fn steady_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(
        max_attempts,
        BackoffSchedule {
            base_ms: 500,
            factor: 1.0,
            max_ms: 500,
            jitter: 0.0,
        },
    )
}

fn services(root: &std::path::Path) -> (RunServices, Arc<MemoryEventSink>) {
    let mut config = AppConfig::default();
    config.retention.root = root.to_path_buf();
    let sink = Arc::new(MemoryEventSink::new());
    let services = RunServices::with_sink(config, sink.clone()).unwrap();
    (services, sink)
}

#[tokio::test(start_paused = true)]
async fn retries_until_the_element_renders() {
    let dir = tempfile::tempdir().unwrap();
    let (mut services, sink) = services(dir.path());
    let page = ScriptedPage::new(Duration::from_millis(50));
    page.show("text=Save", Duration::from_millis(1_000));
    let resolver = services.attach_probe(page.clone());
    let coordinator = services.coordinator();

    let plan = ExecutionPlan::new("save-order").step(
        StepDefinition::new("save", Arc::new(Click { target: save_button() }))
            .with_retry(steady_retry(4))
            .critical(),
    );
    let report = coordinator.run(&plan).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    let save = report.result("save").unwrap();
    assert_eq!(save.outcome, StepOutcome::Success);
    assert_eq!(save.attempts, 3);
    assert_eq!(save.metadata.get("locator"), Some(&json!("text=Save")));

    let stats = resolver.stats();
    assert_eq!(stats.not_found, 2);
    assert_eq!(stats.cached_entries, 1);
    let entry = &services.cache().snapshot()[0];
    assert_eq!(entry.logical_name, "save_button");
    assert_eq!(entry.locators[0].locator, Locator::text("Save"));
    assert_eq!(entry.failure_streak, 0);

    let failures = sink
        .records()
        .into_iter()
        .filter(|r| r.category == "errors")
        .count();
    assert_eq!(failures, 2);
}

#[tokio::test(start_paused = true)]
async fn second_run_uses_the_cached_winner() {
    let dir = tempfile::tempdir().unwrap();
    let (mut services, _) = services(dir.path());
    let page = ScriptedPage::new(Duration::from_millis(40));
    page.show("text=Save", Duration::ZERO);
    services.attach_probe(page.clone());
    let coordinator = services.coordinator();

    let plan = ExecutionPlan::new("save-order").step(StepDefinition::new(
        "save",
        Arc::new(Click { target: save_button() }),
    ));
    let first = coordinator.run(&plan).await.unwrap();
    assert_eq!(
        first.result("save").unwrap().metadata.get("from_cache"),
        Some(&json!(false))
    );

    let second = coordinator.run(&plan).await.unwrap();
    assert_eq!(
        second.result("save").unwrap().metadata.get("from_cache"),
        Some(&json!(true))
    );
    assert_eq!(page.calls("css=#save"), 1);
    assert_eq!(page.calls("text=Save"), 2);

    let report = services.maintenance_report().unwrap();
    let resolver = report.resolver.unwrap();
    assert_eq!(resolver.cache_hits, 1);
    assert_eq!(resolver.races, 1);
}

#[tokio::test(start_paused = true)]
async fn missing_critical_target_aborts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let (mut services, _) = services(dir.path());
    let page = ScriptedPage::new(Duration::from_millis(20));
    services.attach_probe(page);
    let coordinator = services.coordinator();

    let plan = ExecutionPlan::new("save-order")
        .step(StepDefinition::new("login", Arc::new(Noop)))
        .step(
            StepDefinition::new("save", Arc::new(Click { target: save_button() }))
                .with_retry(steady_retry(2))
                .critical(),
        )
        .step(StepDefinition::new("download", Arc::new(Noop)));

    let started = Instant::now();
    let report = coordinator.run(&plan).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));

    assert_eq!(report.status, RunStatus::Aborted);
    assert!(report.result("login").unwrap().is_success());
    assert_eq!(report.result("download").unwrap().outcome, StepOutcome::Skipped);
    let failure = report.failure.unwrap();
    assert_eq!(failure.step_id, "save");
    assert_eq!(failure.attempts, 2);
    assert!(failure.last_error.unwrap().contains("save_button"));

    let maintenance = services.maintenance_report().unwrap();
    assert_eq!(maintenance.resolver.as_ref().unwrap().not_found, 2);
    assert_eq!(maintenance.selector_cache.len(), 0);
    assert!(maintenance.render_text().contains("2 not found"));
}
