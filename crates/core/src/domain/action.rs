use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// What a policy wants the run loop to do next.
///
/// `phase == None` is the "no action available" outcome a recovery can return;
/// it is not the end of the run (see [`Decision::Terminal`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    pub phase: Option<String>,
    #[serde(default)]
    pub params: Map<String, Value>,
    pub reason: String,
}

impl Action {
    pub fn run(phase: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            phase: Some(phase.into()),
            params: Map::new(),
            reason: reason.into(),
        }
    }

    pub fn none(reason: impl Into<String>) -> Self {
        Self {
            phase: None,
            params: Map::new(),
            reason: reason.into(),
        }
    }

    pub fn with_params(mut self, params: Option<Map<String, Value>>) -> Self {
        self.params = params.unwrap_or_default();
        self
    }

    pub fn phase(&self) -> Option<&str> {
        self.phase.as_deref()
    }

    pub fn is_none(&self) -> bool {
        self.phase.is_none()
    }
}

/// Outcome of a decision call: either run something or stop.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Run(Action),
    /// No further work. Not an error.
    Terminal { reason: String },
}

impl Decision {
    pub fn terminal(reason: impl Into<String>) -> Self {
        Self::Terminal {
            reason: reason.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal { .. })
    }

    pub fn action(&self) -> Option<&Action> {
        match self {
            Self::Run(action) => Some(action),
            Self::Terminal { .. } => None,
        }
    }

    pub fn phase(&self) -> Option<&str> {
        self.action().and_then(Action::phase)
    }
}
