//! Flow execution error types

use action_locator::LocatorError;
use thiserror::Error;

use crate::state::StepState;

/// Errors that stop a run. Ordinary step failures are reported through
/// [`crate::types::StepResult`] instead.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Invalid plan, unknown executor or a step reporting a configuration problem
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A step that already reached a terminal state was executed again
    #[error("Step {step_id} already finished as {state}")]
    ContractViolation { step_id: String, state: StepState },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FlowError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        FlowError::Configuration(msg.into())
    }
}

/// Error returned by a step executor for a single attempt.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StepError {
    /// Worth another attempt (element not found yet, flaky UI, timeouts)
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Never retried; aborts the run
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The step observed cancellation and gave up
    #[error("Step cancelled")]
    Cancelled,
}

impl StepError {
    pub fn transient(msg: impl Into<String>) -> Self {
        StepError::Transient(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StepError::Transient(_))
    }
}

impl From<LocatorError> for StepError {
    fn from(err: LocatorError) -> Self {
        if err.is_configuration() {
            StepError::Configuration(err.to_string())
        } else if matches!(err, LocatorError::Cancelled) {
            StepError::Cancelled
        } else {
            StepError::Transient(err.to_string())
        }
    }
}

/// Diagnostic capture failure. Logged by the coordinator, never propagated.
#[derive(Debug, Error)]
pub enum DiagnosticError {
    #[error("Diagnostic source unavailable: {0}")]
    Source(String),

    #[error("Failed to write diagnostic artifact {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Diagnostic capture timed out after {0}ms")]
    Timeout(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locator_errors_map_to_step_classes() {
        let not_found = LocatorError::NotFound {
            logical_name: "submit".into(),
            attempted: vec!["css=#go".into()],
        };
        let err = StepError::from(not_found);
        assert!(err.is_retryable());
        assert!(err.to_string().contains("'submit' not found"));

        let err = StepError::from(LocatorError::InvalidDefinition("empty".into()));
        assert!(matches!(err, StepError::Configuration(_)));
        assert!(!err.is_retryable());

        assert_eq!(StepError::from(LocatorError::Cancelled), StepError::Cancelled);
    }
}
