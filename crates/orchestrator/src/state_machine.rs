use std::fmt;

use crate::error::{OrchestratorError, Result};

/// Lifecycle of the external decision policy within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolicyState {
    #[default]
    Selecting,
    AwaitingReply,
    Repairing,
    Finalizing,
    Terminal,
}

impl PolicyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Selecting => "selecting",
            Self::AwaitingReply => "awaiting_reply",
            Self::Repairing => "repairing",
            Self::Finalizing => "finalizing",
            Self::Terminal => "terminal",
        }
    }
}

impl fmt::Display for PolicyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct PolicyStateMachine;

impl PolicyStateMachine {
    pub fn validate_transition(from: &PolicyState, to: &PolicyState) -> Result<()> {
        let allowed = Self::allowed_transitions(from);

        if allowed.contains(to) {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }

    fn allowed_transitions(from: &PolicyState) -> Vec<PolicyState> {
        match from {
            PolicyState::Selecting => vec![PolicyState::AwaitingReply, PolicyState::Terminal],
            // A transport failure drops back to selecting with nothing mutated.
            PolicyState::AwaitingReply => vec![PolicyState::Repairing, PolicyState::Selecting],
            PolicyState::Repairing => vec![PolicyState::Finalizing, PolicyState::Terminal],
            PolicyState::Finalizing => vec![PolicyState::Selecting, PolicyState::Terminal],
            PolicyState::Terminal => vec![],
        }
    }

    pub fn can_transition(from: &PolicyState, to: &PolicyState) -> bool {
        Self::validate_transition(from, to).is_ok()
    }

    /// Move `state` to `to`, rejecting transitions the lifecycle does not allow.
    pub fn transition(state: &mut PolicyState, to: PolicyState) -> Result<()> {
        Self::validate_transition(state, &to)?;
        *state = to;
        Ok(())
    }
}
