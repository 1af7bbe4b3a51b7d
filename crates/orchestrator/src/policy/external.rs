use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use llm::{DecisionSource, DEFAULT_DECISION_TIMEOUT};
use recon_core::{Action, Budget, Decision, ExecutionContext, ExecutionCounts, History};
use tracing::{debug, info, warn};

use crate::directive::{repair, Directive, RecoveryKind, RecoveryReply};
use crate::error::Result;
use crate::prompts::DecisionPrompts;
use crate::state_machine::{PolicyState, PolicyStateMachine};

use super::{
    failure_signals, first_under_budget, status_summary, DecisionPolicy, PhaseFailure,
    PhaseStatus, DEFAULT_ZERO_COUNT_PHASES,
};

const PARSE_FALLBACK_REASON: &str = "fallback: parse failure";
const DEFAULT_REASON: &str = "selected by decision source";

/// Asks a [`DecisionSource`] what to run next and keeps its answers inside
/// per-phase execution budgets.
///
/// Execution counts live for one run and are only changed when a decision or
/// recovery is returned, never on a transport failure.
pub struct ExternalPolicy {
    source: Arc<dyn DecisionSource>,
    priority: Vec<String>,
    catalogue: Vec<(String, String)>,
    budget: Budget,
    counts: ExecutionCounts,
    zero_count_phases: HashSet<String>,
    timeout: Duration,
    state: PolicyState,
}

impl ExternalPolicy {
    /// `priority` is both the set of phases the policy may return and the
    /// order used for substitutions and fallbacks.
    pub fn new(source: Arc<dyn DecisionSource>, priority: Vec<String>, budget: Budget) -> Self {
        let catalogue = priority
            .iter()
            .map(|name| (name.clone(), String::new()))
            .collect();
        Self {
            source,
            priority,
            catalogue,
            budget,
            counts: ExecutionCounts::new(),
            zero_count_phases: DEFAULT_ZERO_COUNT_PHASES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            timeout: DEFAULT_DECISION_TIMEOUT,
            state: PolicyState::default(),
        }
    }

    /// Descriptions rendered into the module catalogue of each request.
    pub fn with_catalogue(mut self, catalogue: Vec<(String, String)>) -> Self {
        self.catalogue = catalogue;
        self
    }

    pub fn with_zero_count_phases<I, S>(mut self, phases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.zero_count_phases = phases.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn counts(&self) -> &ExecutionCounts {
        &self.counts
    }

    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    pub fn state(&self) -> PolicyState {
        self.state
    }

    fn is_registered(&self, phase: &str) -> bool {
        self.priority.iter().any(|p| p == phase)
    }

    fn has_capacity(&self, phase: &str) -> bool {
        self.is_registered(phase) && self.counts.has_capacity(phase, &self.budget)
    }

    fn status(&self, history: &History) -> Vec<PhaseStatus> {
        let retry = failure_signals(history, &self.zero_count_phases);
        status_summary(&self.priority, &self.counts, &self.budget, &retry)
    }

    fn finish(&mut self, reason: impl Into<String>) -> Result<Decision> {
        PolicyStateMachine::transition(&mut self.state, PolicyState::Terminal)?;
        let reason = reason.into();
        info!(reason = %reason, "External policy reached terminal state");
        Ok(Decision::terminal(reason))
    }

    /// Budget-checked action for a parsed directive, substituting when the
    /// named phase is exhausted or unknown.
    fn admit(&self, directive: Directive) -> Option<Action> {
        let phase = directive.phase.trim();
        let reason = if directive.reason.trim().is_empty() {
            DEFAULT_REASON.to_string()
        } else {
            directive.reason.clone()
        };

        if self.has_capacity(phase) {
            return Some(Action::run(phase, reason).with_params(Some(directive.params())));
        }

        let why = if self.is_registered(phase) {
            "execution budget reached"
        } else {
            "unknown phase"
        };
        let substitute =
            first_under_budget(&self.priority, &self.counts, &self.budget, Some(phase))?;
        warn!(
            requested = %phase,
            substitute = %substitute,
            why,
            "Substituting phase chosen by decision source"
        );
        Some(Action::run(
            substitute,
            format!("{reason} (substituted {substitute} for {phase}: {why})"),
        ))
    }

    /// Deterministic choice among phases under budget, preferring ones not yet
    /// seen in the history.
    fn parse_fallback(&self, history: &History) -> Option<Action> {
        let seen = history.phases_seen();
        let under_budget = || {
            self.priority
                .iter()
                .map(String::as_str)
                .filter(|phase| self.counts.has_capacity(phase, &self.budget))
        };
        let phase = under_budget()
            .find(|phase| !seen.contains(phase))
            .or_else(|| under_budget().next())?;
        Some(Action::run(phase, PARSE_FALLBACK_REASON))
    }

    /// Count the action against its phase budget and hand it out.
    fn commit(&mut self, action: Action) -> Action {
        if let Some(phase) = action.phase() {
            let count = self.counts.increment(phase);
            debug!(phase = %phase, count, "Execution count updated");
        }
        action
    }
}

#[async_trait]
impl DecisionPolicy for ExternalPolicy {
    fn name(&self) -> &'static str {
        "external"
    }

    async fn decide(&mut self, ctx: &ExecutionContext, history: &History) -> Result<Decision> {
        if self.state == PolicyState::Terminal {
            return Ok(Decision::terminal("decision policy already finished"));
        }
        if self.counts.all_exhausted(&self.priority, &self.budget) {
            return self.finish("all phases reached their execution budget");
        }

        let history_json = serde_json::to_string_pretty(history)?;
        let prompt = DecisionPrompts::next_action(
            ctx.target(),
            &self.catalogue,
            &self.status(history),
            &history_json,
        );
        debug!(prompt = %prompt, "Requesting next phase");

        PolicyStateMachine::transition(&mut self.state, PolicyState::AwaitingReply)?;
        let reply = match self.source.send_with_timeout(&prompt, self.timeout).await {
            Ok(reply) => reply,
            Err(e) => {
                PolicyStateMachine::transition(&mut self.state, PolicyState::Selecting)?;
                warn!(error = %e, "Decision request failed");
                return Err(e.into());
            }
        };
        debug!(reply = %reply, "Decision source reply");

        PolicyStateMachine::transition(&mut self.state, PolicyState::Repairing)?;
        let chosen = match repair::<Directive>(&reply) {
            Ok(repaired) => {
                debug!(stage = ?repaired.stage, "Directive recovered");
                if repaired.value.is_done() {
                    let reason = if repaired.value.reason.trim().is_empty() {
                        "decision source reported completion".to_string()
                    } else {
                        repaired.value.reason
                    };
                    return self.finish(reason);
                }
                self.admit(repaired.value)
            }
            Err(e) => {
                warn!(error = %e, "Falling back to default phase order");
                self.parse_fallback(history)
            }
        };

        let Some(action) = chosen else {
            return self.finish("no phase left under its execution budget");
        };

        PolicyStateMachine::transition(&mut self.state, PolicyState::Finalizing)?;
        let action = self.commit(action);
        PolicyStateMachine::transition(&mut self.state, PolicyState::Selecting)?;

        info!(
            phase = action.phase().unwrap_or_default(),
            reason = %action.reason,
            "External policy decision"
        );
        Ok(Decision::Run(action))
    }

    async fn recover(
        &mut self,
        ctx: &ExecutionContext,
        history: &History,
        failure: &PhaseFailure,
    ) -> Action {
        let failing = failure.phase.as_deref();
        let history_json = match serde_json::to_string_pretty(history) {
            Ok(json) => json,
            Err(e) => return Action::none(format!("recovery unavailable: {e}")),
        };
        let prompt = DecisionPrompts::recovery(
            ctx.target(),
            &failure.error,
            failing,
            &self.status(history),
            &history_json,
        );
        debug!(prompt = %prompt, "Requesting recovery");

        let reply = match self.source.send_with_timeout(&prompt, self.timeout).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Recovery request failed");
                return Action::none(format!(
                    "recovery request failed: {e}; original error: {}",
                    failure.error
                ));
            }
        };
        debug!(reply = %reply, "Recovery reply");

        let reply = match repair::<RecoveryReply>(&reply) {
            Ok(repaired) => Some(repaired.value),
            Err(e) => {
                warn!(error = %e, "Unreadable recovery reply, skipping");
                None
            }
        };
        let reason = reply
            .as_ref()
            .map(|r| r.reason.trim())
            .filter(|r| !r.is_empty())
            .unwrap_or("recovery after error")
            .to_string();

        match reply.as_ref().map(RecoveryReply::kind) {
            Some(RecoveryKind::Retry) => {
                if let Some(phase) = failing.filter(|p| self.is_registered(p)) {
                    if !self.has_capacity(phase) {
                        info!(phase = %phase, "Recovery: retry refused, budget reached");
                        return Action::none(format!("retry limit reached for {phase}"));
                    }
                    info!(phase = %phase, "Recovery: retry");
                    return self.commit(Action::run(phase, reason));
                }
            }
            Some(RecoveryKind::Alternative) => {
                let named = reply.as_ref().and_then(RecoveryReply::named_phase);
                if let Some(phase) = named.filter(|p| self.is_registered(p)) {
                    if !self.has_capacity(phase) {
                        info!(phase = %phase, "Recovery: alternative refused, budget reached");
                        return Action::none(format!("execution limit reached for {phase}"));
                    }
                    info!(phase = %phase, "Recovery: alternative");
                    let action = Action::run(phase, reason);
                    return self.commit(action);
                }
            }
            _ => {}
        }

        match first_under_budget(&self.priority, &self.counts, &self.budget, failing) {
            Some(phase) => {
                info!(phase = %phase, failed = ?failing, "Recovery: skip");
                let action = Action::run(phase, format!("skip: {reason}"));
                self.commit(action)
            }
            None => Action::none(format!("no phase available after error: {}", failure.error)),
        }
    }

    fn record_execution(&mut self, phase: &str) {
        self.counts.increment(phase);
    }
}
