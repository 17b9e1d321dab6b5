//! Execution context and the capabilities business modules plug in

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use action_locator::{ElementResolver, LocatorSet, ResolvedTarget};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use l6_observe::PerformanceTracker;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::errors::{DiagnosticError, StepError};
use crate::types::StepOutput;

/// One unit of business work, e.g. "open the orders page".
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, ctx: &StepContext) -> Result<StepOutput, StepError>;
}

/// Variables shared by every step of one run.
pub type SharedVars = Arc<Mutex<BTreeMap<String, Value>>>;

/// Handed to an executor for a single attempt.
#[derive(Clone)]
pub struct StepContext {
    pub run_id: String,
    pub step_id: String,
    pub label: String,
    /// 1-based attempt number.
    pub attempt: u32,
    pub max_attempts: u32,
    pub(crate) cancel: CancellationToken,
    pub(crate) resolver: Option<Arc<dyn ElementResolver>>,
    pub(crate) tracker: PerformanceTracker,
    pub(crate) vars: SharedVars,
}

impl StepContext {
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    pub fn tracker(&self) -> &PerformanceTracker {
        &self.tracker
    }

    pub fn resolver(&self) -> Result<&Arc<dyn ElementResolver>, StepError> {
        self.resolver
            .as_ref()
            .ok_or_else(|| StepError::Configuration("no element resolver configured".into()))
    }

    /// Resolve a target, mapping a miss to a retryable step failure.
    pub async fn locate(&self, set: &LocatorSet, deadline: Instant) -> Result<ResolvedTarget, StepError> {
        let resolver = self.resolver()?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StepError::Cancelled),
            resolved = resolver.resolve_set(set, deadline) => resolved.map_err(StepError::from),
        }
    }

    pub fn var(&self, key: &str) -> Option<Value> {
        self.vars.lock().get(key).cloned()
    }

    pub fn set_var(&self, key: impl Into<String>, value: Value) {
        self.vars.lock().insert(key.into(), value);
    }
}

/// Severity prefix used when naming captured artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureLevel {
    Error,
    Step,
    Success,
}

impl CaptureLevel {
    pub fn prefix(self) -> &'static str {
        match self {
            CaptureLevel::Error => "error",
            CaptureLevel::Step => "step",
            CaptureLevel::Success => "success",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub run_id: String,
    pub step_id: String,
    pub label: String,
    pub attempt: u32,
    pub level: CaptureLevel,
    pub error: Option<String>,
}

/// Where a captured diagnostic ended up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub path: PathBuf,
    pub captured_at: DateTime<Utc>,
    pub bytes: u64,
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Screenshot or similar evidence captured after a failed attempt.
#[async_trait]
pub trait DiagnosticCapture: Send + Sync {
    async fn capture(&self, request: &CaptureRequest) -> Result<ArtifactRef, DiagnosticError>;
}
