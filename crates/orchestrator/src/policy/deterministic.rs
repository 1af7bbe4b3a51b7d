use async_trait::async_trait;
use recon_core::{Action, Decision, ExecutionContext, History};
use tracing::debug;

use crate::error::Result;

use super::{default_priority, DecisionPolicy, PhaseFailure};

const ORDER_REASON: &str = "default phase order";
const DONE_REASON: &str = "all phases completed";

/// Runs each phase once, in a fixed priority order.
///
/// Stateless: the next phase is the first one in priority order that has no
/// result in the history yet, so the same history always yields the same
/// decision.
#[derive(Debug, Clone)]
pub struct DeterministicPolicy {
    priority: Vec<String>,
}

impl Default for DeterministicPolicy {
    fn default() -> Self {
        Self::new(default_priority())
    }
}

impl DeterministicPolicy {
    pub fn new(priority: Vec<String>) -> Self {
        Self { priority }
    }

    pub fn priority(&self) -> &[String] {
        &self.priority
    }

    /// First phase in priority order without a result in `history`.
    pub fn next_unseen(&self, history: &History) -> Option<&str> {
        let seen = history.phases_seen();
        self.priority
            .iter()
            .map(String::as_str)
            .find(|phase| !seen.contains(phase))
    }

    pub fn select(&self, history: &History) -> Decision {
        match self.next_unseen(history) {
            Some(phase) => Decision::Run(Action::run(phase, ORDER_REASON)),
            None => Decision::terminal(DONE_REASON),
        }
    }
}

#[async_trait]
impl DecisionPolicy for DeterministicPolicy {
    fn name(&self) -> &'static str {
        "deterministic"
    }

    async fn decide(&mut self, _ctx: &ExecutionContext, history: &History) -> Result<Decision> {
        let decision = self.select(history);
        debug!(decision = ?decision, "Deterministic decision");
        Ok(decision)
    }

    async fn recover(
        &mut self,
        _ctx: &ExecutionContext,
        _history: &History,
        failure: &PhaseFailure,
    ) -> Action {
        Action::none(format!("skip due to error: {}", failure.error))
    }
}
