//! Core types for step orchestration

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::{ArtifactRef, StepExecutor};
use crate::strategies::RetryPolicy;

/// A step of a plan. Immutable once the run starts.
#[derive(Clone)]
pub struct StepDefinition {
    pub id: String,
    pub label: String,
    pub executor: Arc<dyn StepExecutor>,
    pub retry: RetryPolicy,
    /// A critical step that ends `Failed` aborts the rest of the run.
    pub critical: bool,
}

impl StepDefinition {
    pub fn new(id: impl Into<String>, executor: Arc<dyn StepExecutor>) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            executor,
            retry: RetryPolicy::default(),
            critical: false,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn with_critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("retry", &self.retry)
            .field("critical", &self.critical)
            .finish_non_exhaustive()
    }
}

/// Ordered steps plus an optional overall deadline.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub name: String,
    pub steps: Vec<StepDefinition>,
    pub deadline: Option<Duration>,
}

impl ExecutionPlan {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            deadline: None,
        }
    }

    pub fn step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// What an executor hands back on success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    pub metadata: BTreeMap<String, Value>,
}

impl StepOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Success,
    Failed,
    Skipped,
}

/// Produced exactly once per step per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub label: String,
    pub outcome: StepOutcome,
    pub attempts: u32,
    pub duration: Duration,
    pub last_error: Option<String>,
    /// Why the step was skipped.
    pub reason: Option<String>,
    pub artifact: Option<ArtifactRef>,
    pub metadata: BTreeMap<String, Value>,
}

impl StepResult {
    pub(crate) fn new(step: &StepDefinition, outcome: StepOutcome) -> Self {
        Self {
            step_id: step.id.clone(),
            label: step.label.clone(),
            outcome,
            attempts: 0,
            duration: Duration::ZERO,
            last_error: None,
            reason: None,
            artifact: None,
            metadata: BTreeMap::new(),
        }
    }

    pub(crate) fn skipped(step: &StepDefinition, reason: impl Into<String>) -> Self {
        let mut result = Self::new(step, StepOutcome::Skipped);
        result.reason = Some(reason.into());
        result
    }

    pub fn is_success(&self) -> bool {
        self.outcome == StepOutcome::Success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every step succeeded.
    Completed,
    /// Finished, but at least one non-critical step failed.
    CompletedWithFailures,
    /// A critical step failed; later steps were skipped.
    Aborted,
    /// The run deadline expired.
    DeadlineExceeded,
    /// The run was cancelled from outside.
    Cancelled,
}

/// Summary of the critical failure that aborted a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateFailure {
    pub step_id: String,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub artifact: Option<ArtifactRef>,
}

impl From<&StepResult> for AggregateFailure {
    fn from(result: &StepResult) -> Self {
        Self {
            step_id: result.step_id.clone(),
            attempts: result.attempts,
            last_error: result.last_error.clone(),
            artifact: result.artifact.clone(),
        }
    }
}

impl fmt::Display for AggregateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "critical step {} failed after {} attempt(s): {}",
            self.step_id,
            self.attempts,
            self.last_error.as_deref().unwrap_or("unknown error")
        )?;
        if let Some(artifact) = &self.artifact {
            write!(f, " (see {artifact})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub plan: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub results: Vec<StepResult>,
    pub failure: Option<AggregateFailure>,
}

impl RunReport {
    pub fn result(&self, step_id: &str) -> Option<&StepResult> {
        self.results.iter().find(|r| r.step_id == step_id)
    }

    pub fn count(&self, outcome: StepOutcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }
}
