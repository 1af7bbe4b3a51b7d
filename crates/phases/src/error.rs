use std::time::Duration;

use orchestrator::OrchestratorError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("Could not resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No addresses found for {0}")]
    NoAddress(String),

    #[error("No web server answered for {0}")]
    Unreachable(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl PhaseError {
    /// Wrap as the failure of `phase`.
    pub fn into_failure(self, phase: &str) -> OrchestratorError {
        OrchestratorError::phase_failed(phase, self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PhaseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_failure_keeps_message() {
        let err = PhaseError::NoAddress("example.invalid".to_string()).into_failure("passive");
        assert_eq!(
            err.to_string(),
            "Phase passive failed: No addresses found for example.invalid"
        );
    }
}
