//! Step coordinator
//!
//! Runs plan steps strictly in order. Each step gets its retry budget, each
//! failed attempt gets a bounded diagnostic capture, and the whole run can be
//! cut short by a deadline.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use action_locator::ElementResolver;
use chrono::Utc;
use l6_observe::PerformanceTracker;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use stepwise_event_store::{EventSink, LogRecord, Severity};
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::context::{
    ArtifactRef, CaptureLevel, CaptureRequest, DiagnosticCapture, SharedVars, StepContext,
};
use crate::errors::{FlowError, StepError};
use crate::state::{StepState, StepStateMachine};
use crate::types::*;

pub const DEADLINE_REASON: &str = "run deadline exceeded";
pub const CANCELLED_REASON: &str = "run cancelled";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Bound on each diagnostic capture.
    pub diagnostic_timeout_ms: u64,
    /// Applied when a plan has no deadline of its own.
    pub default_run_deadline_ms: Option<u64>,
    /// Also capture diagnostics after a successful step.
    pub capture_on_success: bool,
    /// Category used for persisted failure records.
    pub failure_category: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            diagnostic_timeout_ms: 2_000,
            default_run_deadline_ms: None,
            capture_on_success: false,
            failure_category: "errors".to_string(),
        }
    }
}

impl CoordinatorConfig {
    pub fn diagnostic_timeout(&self) -> Duration {
        Duration::from_millis(self.diagnostic_timeout_ms)
    }
}

#[derive(Default)]
struct StepProgress {
    machine: Option<StepStateMachine>,
    attempts: u32,
}

/// State of one run: its id, cancellation and which steps already finished.
pub struct RunContext {
    run_id: String,
    cancel: CancellationToken,
    vars: SharedVars,
    progress: Mutex<HashMap<String, StepProgress>>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::with_cancel(CancellationToken::new())
    }

    /// Cancelling `parent` cancels the run; the run cancelling itself (for
    /// example on its deadline) leaves `parent` untouched.
    pub fn with_cancel(parent: CancellationToken) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            cancel: parent.child_token(),
            vars: SharedVars::default(),
            progress: Mutex::new(HashMap::new()),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn vars(&self) -> &SharedVars {
        &self.vars
    }

    pub fn state(&self, step_id: &str) -> Option<StepState> {
        self.progress
            .lock()
            .get(step_id)
            .and_then(|p| p.machine.as_ref().map(StepStateMachine::state))
    }

    pub fn history(&self, step_id: &str) -> Vec<StepState> {
        self.progress
            .lock()
            .get(step_id)
            .and_then(|p| p.machine.as_ref().map(|m| m.history().to_vec()))
            .unwrap_or_default()
    }

    fn attempts(&self, step_id: &str) -> u32 {
        self.progress.lock().get(step_id).map_or(0, |p| p.attempts)
    }

    fn begin(&self, step_id: &str) -> Result<(), FlowError> {
        let mut progress = self.progress.lock();
        let entry = progress.entry(step_id.to_string()).or_default();
        if let Some(machine) = &entry.machine {
            let state = machine.state();
            if state.is_terminal() {
                return Err(FlowError::ContractViolation {
                    step_id: step_id.to_string(),
                    state,
                });
            }
            if state != StepState::Pending {
                return Err(FlowError::Internal(format!(
                    "step {step_id} is already {state}"
                )));
            }
        } else {
            entry.machine = Some(StepStateMachine::new(step_id));
        }
        Ok(())
    }

    fn transition(&self, step_id: &str, next: StepState) -> Result<(), FlowError> {
        let mut progress = self.progress.lock();
        let entry = progress.entry(step_id.to_string()).or_default();
        let machine = entry
            .machine
            .get_or_insert_with(|| StepStateMachine::new(step_id));
        machine.transition(next)?;
        if next == StepState::Running {
            entry.attempts += 1;
        }
        Ok(())
    }

    /// Force a non-terminal step into `Skipped`. No-op for finished steps.
    fn mark_skipped(&self, step_id: &str) {
        let mut progress = self.progress.lock();
        let entry = progress.entry(step_id.to_string()).or_default();
        let machine = entry
            .machine
            .get_or_insert_with(|| StepStateMachine::new(step_id));
        if !machine.state().is_terminal() {
            let _ = machine.transition(StepState::Skipped);
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

pub struct StepCoordinator {
    tracker: PerformanceTracker,
    resolver: Option<Arc<dyn ElementResolver>>,
    diagnostics: Option<Arc<dyn DiagnosticCapture>>,
    failure_sink: Option<Arc<dyn EventSink>>,
    config: CoordinatorConfig,
}

enum AttemptEnd {
    Done(Result<StepOutput, StepError>),
    Cancelled,
}

impl StepCoordinator {
    pub fn new(tracker: PerformanceTracker, config: CoordinatorConfig) -> Self {
        Self {
            tracker,
            resolver: None,
            diagnostics: None,
            failure_sink: None,
            config,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ElementResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DiagnosticCapture>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn with_failure_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.failure_sink = Some(sink);
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn tracker(&self) -> &PerformanceTracker {
        &self.tracker
    }

    pub fn validate_plan(&self, plan: &ExecutionPlan) -> Result<(), FlowError> {
        if plan.steps.is_empty() {
            return Err(FlowError::configuration(format!(
                "plan '{}' has no steps",
                plan.name
            )));
        }
        let mut seen = HashSet::new();
        for step in &plan.steps {
            if step.id.trim().is_empty() {
                return Err(FlowError::configuration("step id cannot be empty"));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(FlowError::configuration(format!(
                    "duplicate step id '{}'",
                    step.id
                )));
            }
            step.retry
                .validate()
                .map_err(|msg| FlowError::configuration(format!("step {}: {msg}", step.id)))?;
        }
        if plan.deadline == Some(Duration::ZERO) {
            return Err(FlowError::configuration("run deadline must be positive"));
        }
        Ok(())
    }

    /// Run one step under its retry policy.
    ///
    /// Ordinary failures come back as a `Failed` result. `Err` means a
    /// configuration problem or a step that already finished in this run.
    pub async fn execute(
        &self,
        step: &StepDefinition,
        run: &RunContext,
    ) -> Result<StepResult, FlowError> {
        run.begin(&step.id)?;
        let started = Instant::now();

        if run.cancel.is_cancelled() {
            run.transition(&step.id, StepState::Skipped)?;
            return Ok(StepResult::skipped(step, CANCELLED_REASON));
        }

        let max_attempts = step.retry.max_attempts.max(1);
        let mut last_error: Option<String> = None;
        let mut artifact: Option<ArtifactRef> = None;
        let mut attempt = 0;

        loop {
            attempt += 1;
            run.transition(&step.id, StepState::Running)?;
            let ctx = StepContext {
                run_id: run.run_id.clone(),
                step_id: step.id.clone(),
                label: step.label.clone(),
                attempt,
                max_attempts,
                cancel: run.cancel.child_token(),
                resolver: self.resolver.clone(),
                tracker: self.tracker.clone(),
                vars: run.vars.clone(),
            };

            let scope = self.tracker.track(format!("step:{}", step.id));
            let end = tokio::select! {
                biased;
                _ = run.cancel.cancelled() => AttemptEnd::Cancelled,
                outcome = scope.run_within(step.executor.execute(&ctx)) => AttemptEnd::Done(outcome),
            };

            let err = match end {
                AttemptEnd::Done(Ok(output)) => {
                    scope.succeed();
                    run.transition(&step.id, StepState::Success)?;
                    info!(run_id = %run.run_id, step = %step.id, attempt, "step succeeded");
                    if self.config.capture_on_success {
                        artifact = self
                            .capture(step, run, attempt, CaptureLevel::Success, None)
                            .await;
                    }
                    let mut result = StepResult::new(step, StepOutcome::Success);
                    result.attempts = attempt;
                    result.duration = started.elapsed();
                    result.last_error = last_error;
                    result.artifact = artifact;
                    result.metadata = output.metadata;
                    return Ok(result);
                }
                AttemptEnd::Done(Err(err)) => err,
                AttemptEnd::Cancelled => StepError::Cancelled,
            };

            scope.fail(&err);
            match err {
                StepError::Cancelled => {
                    run.transition(&step.id, StepState::Skipped)?;
                    info!(run_id = %run.run_id, step = %step.id, attempt, "step cancelled");
                    let mut result = StepResult::skipped(step, CANCELLED_REASON);
                    result.attempts = attempt;
                    result.duration = started.elapsed();
                    result.last_error = last_error;
                    result.artifact = artifact;
                    return Ok(result);
                }
                StepError::Configuration(msg) => {
                    run.transition(&step.id, StepState::Failed)?;
                    error!(run_id = %run.run_id, step = %step.id, attempt, error = %msg, "step misconfigured");
                    return Err(FlowError::Configuration(format!("step {}: {msg}", step.id)));
                }
                StepError::Transient(msg) => {
                    if let Some(captured) = self
                        .capture(step, run, attempt, CaptureLevel::Error, Some(&msg))
                        .await
                    {
                        artifact = Some(captured);
                    }
                    self.record_failure(step, run, attempt, max_attempts, &msg, artifact.as_ref());
                    last_error = Some(msg);
                }
            }

            if attempt >= max_attempts {
                run.transition(&step.id, StepState::Failed)?;
                warn!(
                    run_id = %run.run_id,
                    step = %step.id,
                    attempts = attempt,
                    "step failed after exhausting retries"
                );
                let mut result = StepResult::new(step, StepOutcome::Failed);
                result.attempts = attempt;
                result.duration = started.elapsed();
                result.last_error = last_error;
                result.artifact = artifact;
                return Ok(result);
            }

            run.transition(&step.id, StepState::Retrying)?;
            let delay = step.retry.backoff.delay(attempt);
            debug!(step = %step.id, attempt, delay_ms = delay.as_millis() as u64, "backing off");
            tokio::select! {
                biased;
                _ = run.cancel.cancelled() => {
                    run.transition(&step.id, StepState::Skipped)?;
                    let mut result = StepResult::skipped(step, CANCELLED_REASON);
                    result.attempts = attempt;
                    result.duration = started.elapsed();
                    result.last_error = last_error;
                    result.artifact = artifact;
                    return Ok(result);
                }
                _ = sleep(delay) => {}
            }
        }
    }

    /// Run every step of `plan` in declared order.
    pub async fn run(&self, plan: &ExecutionPlan) -> Result<RunReport, FlowError> {
        self.run_with(plan, &RunContext::new()).await
    }

    pub async fn run_with(
        &self,
        plan: &ExecutionPlan,
        run: &RunContext,
    ) -> Result<RunReport, FlowError> {
        self.validate_plan(plan)?;
        let scope = self.tracker.track(format!("run:{}", plan.name));
        let outcome = scope.run_within(self.run_steps(plan, run)).await;
        match &outcome {
            Ok(report) if report.status == RunStatus::Completed => {
                scope.succeed();
            }
            Ok(report) => {
                scope.fail(format!("{:?}", report.status));
            }
            Err(err) => {
                scope.fail(err);
            }
        }
        outcome
    }

    async fn run_steps(
        &self,
        plan: &ExecutionPlan,
        run: &RunContext,
    ) -> Result<RunReport, FlowError> {
        let started_at = Utc::now();
        let started = Instant::now();
        let deadline = plan
            .deadline
            .or(self.config.default_run_deadline_ms.map(Duration::from_millis))
            .map(|d| started + d);
        info!(
            run_id = %run.run_id,
            plan = %plan.name,
            steps = plan.steps.len(),
            deadline_ms = ?deadline.map(|d| d.duration_since(started).as_millis() as u64),
            "run started"
        );

        let mut results = Vec::with_capacity(plan.steps.len());
        let mut status = RunStatus::Completed;
        let mut failure = None;

        for (idx, step) in plan.steps.iter().enumerate() {
            let step_started = Instant::now();
            let executed = match deadline {
                Some(at) if step_started >= at => None,
                Some(at) => timeout_at(at, self.execute(step, run)).await.ok(),
                None => Some(self.execute(step, run).await),
            };

            let result = match executed {
                Some(result) => result?,
                None => {
                    run.cancel();
                    run.mark_skipped(&step.id);
                    warn!(run_id = %run.run_id, step = %step.id, "run deadline exceeded");
                    let mut result = StepResult::skipped(step, DEADLINE_REASON);
                    result.attempts = run.attempts(&step.id);
                    result.duration = step_started.elapsed();
                    results.push(result);
                    self.skip_rest(plan, idx, run, DEADLINE_REASON, &mut results);
                    status = RunStatus::DeadlineExceeded;
                    break;
                }
            };

            match result.outcome {
                StepOutcome::Success => results.push(result),
                StepOutcome::Failed if step.critical => {
                    let aggregate = AggregateFailure::from(&result);
                    error!(run_id = %run.run_id, failure = %aggregate, "aborting run");
                    let reason = format!("critical step {} failed", step.id);
                    results.push(result);
                    self.skip_rest(plan, idx, run, &reason, &mut results);
                    failure = Some(aggregate);
                    status = RunStatus::Aborted;
                    break;
                }
                StepOutcome::Failed => {
                    status = RunStatus::CompletedWithFailures;
                    results.push(result);
                }
                StepOutcome::Skipped => {
                    results.push(result);
                    self.skip_rest(plan, idx, run, CANCELLED_REASON, &mut results);
                    status = RunStatus::Cancelled;
                    break;
                }
            }
        }

        let report = RunReport {
            run_id: run.run_id.clone(),
            plan: plan.name.clone(),
            status,
            started_at,
            duration: started.elapsed(),
            results,
            failure,
        };
        info!(
            run_id = %report.run_id,
            status = ?report.status,
            succeeded = report.count(StepOutcome::Success),
            failed = report.count(StepOutcome::Failed),
            skipped = report.count(StepOutcome::Skipped),
            duration_ms = report.duration.as_millis() as u64,
            "run finished"
        );
        Ok(report)
    }

    fn skip_rest(
        &self,
        plan: &ExecutionPlan,
        idx: usize,
        run: &RunContext,
        reason: &str,
        results: &mut Vec<StepResult>,
    ) {
        for step in &plan.steps[idx + 1..] {
            run.mark_skipped(&step.id);
            results.push(StepResult::skipped(step, reason));
        }
    }

    async fn capture(
        &self,
        step: &StepDefinition,
        run: &RunContext,
        attempt: u32,
        level: CaptureLevel,
        error: Option<&str>,
    ) -> Option<ArtifactRef> {
        let diagnostics = self.diagnostics.as_ref()?;
        let request = CaptureRequest {
            run_id: run.run_id.clone(),
            step_id: step.id.clone(),
            label: step.label.clone(),
            attempt,
            level,
            error: error.map(str::to_string),
        };
        match timeout(self.config.diagnostic_timeout(), diagnostics.capture(&request)).await {
            Ok(Ok(artifact)) => Some(artifact),
            Ok(Err(err)) => {
                warn!(step = %step.id, attempt, error = %err, "diagnostic capture failed");
                None
            }
            Err(_) => {
                warn!(
                    step = %step.id,
                    attempt,
                    timeout_ms = self.config.diagnostic_timeout_ms,
                    "diagnostic capture timed out"
                );
                None
            }
        }
    }

    fn record_failure(
        &self,
        step: &StepDefinition,
        run: &RunContext,
        attempt: u32,
        max_attempts: u32,
        error: &str,
        artifact: Option<&ArtifactRef>,
    ) {
        warn!(
            run_id = %run.run_id,
            step = %step.id,
            attempt,
            max_attempts,
            error,
            artifact = ?artifact.map(|a| a.path.display().to_string()),
            "step attempt failed"
        );
        let Some(sink) = &self.failure_sink else {
            return;
        };
        let mut record = LogRecord::new(
            self.config.failure_category.as_str(),
            Severity::Error,
            format!("{} failed: {error}", step.label),
        )
        .with_field("run_id", &run.run_id)
        .with_field("step", &step.id)
        .with_field("attempt", format!("{attempt}/{max_attempts}"));
        if let Some(artifact) = artifact {
            record = record.with_field("artifact", artifact);
        }
        if let Err(err) = sink.append(&record) {
            warn!(step = %step.id, error = %err, "failure record dropped");
        }
    }
}
