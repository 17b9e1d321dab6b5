//! Error types for locator system

use thiserror::Error;

/// Locator error enumeration
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LocatorError {
    /// No candidate produced an element before its budget or the deadline ran out
    #[error("'{logical_name}' not found, tried: {}", .attempted.join(", "))]
    NotFound {
        logical_name: String,
        attempted: Vec<String>,
    },

    /// Bad logical name, empty candidate set or malformed locator
    #[error("Invalid locator definition: {0}")]
    InvalidDefinition(String),

    /// Locator catalog could not be read or parsed
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Single probe reported a failure
    #[error("Probe '{locator}' failed: {reason}")]
    ProbeFailed { locator: String, reason: String },

    /// Single probe exceeded its budget
    #[error("Probe '{locator}' timed out after {budget_ms}ms")]
    ProbeTimeout { locator: String, budget_ms: u64 },

    /// Probe abandoned through its cancellation token
    #[error("Probe cancelled")]
    Cancelled,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LocatorError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LocatorError::NotFound { .. }
                | LocatorError::ProbeFailed { .. }
                | LocatorError::ProbeTimeout { .. }
        )
    }

    /// Configuration problems fail fast instead of being retried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            LocatorError::InvalidDefinition(_) | LocatorError::Catalog(_)
        )
    }

    /// Get error severity (0=low, 1=medium, 2=high, 3=critical)
    pub fn severity(&self) -> u8 {
        match self {
            LocatorError::Internal(_) => 3,
            LocatorError::InvalidDefinition(_) | LocatorError::Catalog(_) => 2,
            LocatorError::NotFound { .. }
            | LocatorError::ProbeFailed { .. }
            | LocatorError::ProbeTimeout { .. } => 1,
            LocatorError::Cancelled => 0,
        }
    }
}
