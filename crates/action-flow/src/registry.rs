//! Run plans as data, bound to executors by key
//!
//! ```yaml
//! name: daily-export
//! deadline_ms: 600000
//! steps:
//!   - id: login
//!     executor: portal.login
//!     critical: true
//!   - id: export
//!     label: Export orders
//!     executor: portal.export_orders
//!     retry:
//!       max_attempts: 5
//!       backoff: { base_ms: 1000, factor: 2.0, max_ms: 15000, jitter: 0.2 }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::StepExecutor;
use crate::errors::FlowError;
use crate::strategies::RetryPolicy;
use crate::types::{ExecutionPlan, StepDefinition};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    pub executor: String,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub critical: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunPlan {
    pub name: String,
    #[serde(default)]
    pub deadline_ms: Option<u64>,
    pub steps: Vec<StepSpec>,
}

impl RunPlan {
    pub fn from_yaml_str(raw: &str) -> Result<Self, FlowError> {
        let plan: RunPlan = serde_yaml::from_str(raw)
            .map_err(|err| FlowError::configuration(format!("invalid run plan: {err}")))?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn load(path: &Path) -> Result<Self, FlowError> {
        let raw = fs::read_to_string(path)
            .map_err(|err| FlowError::configuration(format!("{}: {err}", path.display())))?;
        Self::from_yaml_str(&raw)
    }

    /// Structural checks that need no executors.
    pub fn validate(&self) -> Result<(), FlowError> {
        if self.steps.is_empty() {
            return Err(FlowError::configuration(format!(
                "plan '{}' has no steps",
                self.name
            )));
        }
        if self.deadline_ms == Some(0) {
            return Err(FlowError::configuration("deadline_ms must be positive"));
        }
        let mut seen = HashSet::new();
        for spec in &self.steps {
            if spec.id.trim().is_empty() {
                return Err(FlowError::configuration("step id cannot be empty"));
            }
            if !seen.insert(spec.id.as_str()) {
                return Err(FlowError::configuration(format!(
                    "duplicate step id '{}'",
                    spec.id
                )));
            }
            if spec.executor.trim().is_empty() {
                return Err(FlowError::configuration(format!(
                    "step {} has no executor",
                    spec.id
                )));
            }
            spec.retry
                .validate()
                .map_err(|msg| FlowError::configuration(format!("step {}: {msg}", spec.id)))?;
        }
        Ok(())
    }

    pub fn executor_keys(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.executor.as_str())
    }
}

/// Maps executor keys used in plan files to implementations.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: BTreeMap<String, Arc<dyn StepExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: impl Into<String>, executor: Arc<dyn StepExecutor>) -> &mut Self {
        self.executors.insert(key.into(), executor);
        self
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn StepExecutor>> {
        self.executors.get(key).cloned()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.executors.keys().map(String::as_str)
    }

    pub fn bind(&self, plan: &RunPlan) -> Result<ExecutionPlan, FlowError> {
        plan.validate()?;
        let mut missing = Vec::new();
        let mut steps = Vec::with_capacity(plan.steps.len());
        for spec in &plan.steps {
            let Some(executor) = self.get(&spec.executor) else {
                missing.push(spec.executor.clone());
                continue;
            };
            steps.push(
                StepDefinition::new(spec.id.clone(), executor)
                    .with_label(spec.label.clone().unwrap_or_else(|| spec.id.clone()))
                    .with_retry(spec.retry)
                    .with_critical(spec.critical),
            );
        }
        if !missing.is_empty() {
            missing.dedup();
            return Err(FlowError::configuration(format!(
                "unknown executor(s): {}",
                missing.join(", ")
            )));
        }
        Ok(ExecutionPlan {
            name: plan.name.clone(),
            steps,
            deadline: plan.deadline_ms.map(Duration::from_millis),
        })
    }
}
