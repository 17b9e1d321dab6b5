//! Flow Orchestration Layer
//!
//! Runs a plan of business steps in order, retrying transient failures with
//! jittered exponential backoff, capturing diagnostics after failed attempts
//! and enforcing an overall run deadline.

pub mod context;
pub mod coordinator;
pub mod errors;
pub mod registry;
pub mod state;
pub mod strategies;
pub mod types;

pub use context::{
    ArtifactRef, CaptureLevel, CaptureRequest, DiagnosticCapture, SharedVars, StepContext,
    StepExecutor,
};
pub use coordinator::{
    CoordinatorConfig, RunContext, StepCoordinator, CANCELLED_REASON, DEADLINE_REASON,
};
pub use errors::{DiagnosticError, FlowError, StepError};
pub use registry::{ExecutorRegistry, RunPlan, StepSpec};
pub use state::{StepState, StepStateMachine};
pub use strategies::{BackoffSchedule, RetryPolicy};
pub use types::{
    AggregateFailure, ExecutionPlan, RunReport, RunStatus, StepDefinition, StepOutcome,
    StepOutput, StepResult,
};
