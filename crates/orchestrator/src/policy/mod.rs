//! Decision and recovery policies.
//!
//! A [`DecisionPolicy`] picks the next phase to run from the history so far and
//! proposes a remedial action when a phase fails. Two variants exist:
//!
//! - [`DeterministicPolicy`] walks a fixed priority order.
//! - [`ExternalPolicy`] asks a [`DecisionSource`](llm::DecisionSource) and keeps
//!   its picks inside per-phase budgets.

mod deterministic;
mod external;

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use recon_core::{Action, Budget, Decision, ExecutionContext, ExecutionCounts, History};

use crate::error::Result;

pub use deterministic::DeterministicPolicy;
pub use external::ExternalPolicy;

/// Default priority order of the built-in recon phases.
pub const DEFAULT_PRIORITY: [&str; 6] = [
    "passive",
    "subdomain",
    "portscan",
    "webenum",
    "vulnscan",
    "report",
];

/// Phases whose zero `count` means the run found nothing and should retry.
pub const DEFAULT_ZERO_COUNT_PHASES: [&str; 2] = ["subdomain", "portscan"];

pub fn default_priority() -> Vec<String> {
    DEFAULT_PRIORITY.iter().map(|s| s.to_string()).collect()
}

/// A phase execution that failed, as handed to [`DecisionPolicy::recover`].
#[derive(Debug, Clone)]
pub struct PhaseFailure {
    pub phase: Option<String>,
    pub error: String,
}

impl PhaseFailure {
    pub fn new(phase: Option<&str>, error: impl fmt::Display) -> Self {
        Self {
            phase: phase.map(str::to_string),
            error: error.to_string(),
        }
    }
}

#[async_trait]
pub trait DecisionPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Choose the next action, or [`Decision::Terminal`] when nothing is left.
    ///
    /// Errors are transport failures from the decision source; the policy's
    /// internal state is left untouched when one is returned.
    async fn decide(&mut self, ctx: &ExecutionContext, history: &History) -> Result<Decision>;

    /// Propose a remedial action after `failure`. Never fails: when nothing is
    /// possible the returned action has no phase.
    async fn recover(
        &mut self,
        ctx: &ExecutionContext,
        history: &History,
        failure: &PhaseFailure,
    ) -> Action;

    /// Account for a phase the run loop dispatched without asking the policy.
    fn record_execution(&mut self, _phase: &str) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseState {
    Available,
    Completed,
    RetryRecommended,
}

impl fmt::Display for PhaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::Completed => write!(f, "completed"),
            Self::RetryRecommended => write!(f, "failed (retry recommended)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseStatus {
    pub phase: String,
    pub count: u32,
    pub budget: u32,
    pub state: PhaseState,
}

/// Phases whose results in `history` look failed or empty.
pub fn failure_signals(history: &History, zero_count_phases: &HashSet<String>) -> HashSet<String> {
    history
        .iter()
        .filter(|result| {
            result.mentions_failure()
                || (zero_count_phases.contains(&result.phase) && result.is_zero_count())
        })
        .map(|result| result.phase.clone())
        .collect()
}

pub fn status_summary(
    priority: &[String],
    counts: &ExecutionCounts,
    budget: &Budget,
    retry: &HashSet<String>,
) -> Vec<PhaseStatus> {
    priority
        .iter()
        .map(|phase| {
            let count = counts.get(phase);
            let limit = budget.limit(phase);
            let state = if count >= limit {
                PhaseState::Completed
            } else if retry.contains(phase) {
                PhaseState::RetryRecommended
            } else {
                PhaseState::Available
            };
            PhaseStatus {
                phase: phase.clone(),
                count,
                budget: limit,
                state,
            }
        })
        .collect()
}

/// First phase in `priority` that still has budget, skipping `exclude`.
pub fn first_under_budget<'a>(
    priority: &'a [String],
    counts: &ExecutionCounts,
    budget: &Budget,
    exclude: Option<&str>,
) -> Option<&'a str> {
    priority
        .iter()
        .map(String::as_str)
        .filter(|phase| Some(*phase) != exclude)
        .find(|phase| counts.has_capacity(phase, budget))
}
