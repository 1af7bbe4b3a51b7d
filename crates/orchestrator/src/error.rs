use llm::LlmError;
use recon_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Phase not found: {0}")]
    PhaseNotFound(String),

    #[error("Phase {phase} failed: {reason}")]
    PhaseFailed { phase: String, reason: String },

    #[error("Decision source error: {0}")]
    Service(#[from] LlmError),

    #[error("Invalid policy state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Configuration error: {0}")]
    Core(#[from] CoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OrchestratorError {
    /// Create a phase failure error.
    pub fn phase_failed(phase: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PhaseFailed {
            phase: phase.into(),
            reason: reason.into(),
        }
    }

    pub fn is_service(&self) -> bool {
        matches!(self, Self::Service(_))
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
