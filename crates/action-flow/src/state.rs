//! Per-step state machine

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::FlowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Running,
    Retrying,
    Success,
    Failed,
    Skipped,
}

impl StepState {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepState::Success | StepState::Failed | StepState::Skipped)
    }

    /// `Skipped` is only entered through cancellation, a run deadline or an
    /// earlier critical failure, which may land while a step waits to retry.
    pub fn can_transition_to(self, next: StepState) -> bool {
        use StepState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Skipped)
                | (Running, Success)
                | (Running, Failed)
                | (Running, Retrying)
                | (Running, Skipped)
                | (Retrying, Running)
                | (Retrying, Skipped)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepState::Pending => "pending",
            StepState::Running => "running",
            StepState::Retrying => "retrying",
            StepState::Success => "success",
            StepState::Failed => "failed",
            StepState::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks one step through a run and rejects illegal transitions.
#[derive(Debug, Clone)]
pub struct StepStateMachine {
    step_id: String,
    state: StepState,
    history: Vec<StepState>,
}

impl StepStateMachine {
    pub fn new(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            state: StepState::Pending,
            history: vec![StepState::Pending],
        }
    }

    pub fn state(&self) -> StepState {
        self.state
    }

    pub fn history(&self) -> &[StepState] {
        &self.history
    }

    pub fn transition(&mut self, next: StepState) -> Result<(), FlowError> {
        if self.state.is_terminal() {
            return Err(FlowError::ContractViolation {
                step_id: self.step_id.clone(),
                state: self.state,
            });
        }
        if !self.state.can_transition_to(next) {
            return Err(FlowError::Internal(format!(
                "step {}: illegal transition {} -> {}",
                self.step_id, self.state, next
            )));
        }
        self.state = next;
        self.history.push(next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_cycle_then_success() {
        let mut sm = StepStateMachine::new("login");
        sm.transition(StepState::Running).unwrap();
        sm.transition(StepState::Retrying).unwrap();
        sm.transition(StepState::Running).unwrap();
        sm.transition(StepState::Success).unwrap();
        assert_eq!(
            sm.history(),
            &[
                StepState::Pending,
                StepState::Running,
                StepState::Retrying,
                StepState::Running,
                StepState::Success
            ]
        );
    }

    #[test]
    fn terminal_states_reject_everything() {
        for terminal in [StepState::Success, StepState::Failed, StepState::Skipped] {
            for next in [
                StepState::Pending,
                StepState::Running,
                StepState::Retrying,
                StepState::Success,
                StepState::Failed,
                StepState::Skipped,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }

        let mut sm = StepStateMachine::new("export");
        sm.transition(StepState::Skipped).unwrap();
        let err = sm.transition(StepState::Running).unwrap_err();
        assert!(matches!(err, FlowError::ContractViolation { state: StepState::Skipped, .. }));
    }

    #[test]
    fn illegal_shortcuts_are_rejected() {
        assert!(!StepState::Pending.can_transition_to(StepState::Success));
        assert!(!StepState::Pending.can_transition_to(StepState::Failed));
        assert!(!StepState::Retrying.can_transition_to(StepState::Failed));
        let mut sm = StepStateMachine::new("x");
        assert!(matches!(
            sm.transition(StepState::Success),
            Err(FlowError::Internal(_))
        ));
        assert_eq!(sm.state(), StepState::Pending);
    }
}
