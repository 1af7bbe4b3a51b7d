//! The orchestration loop: decide, dispatch, record, recover.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use recon_core::{Action, Decision, ExecutionContext, History, PhaseResult};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::Orchestrator;
use crate::error::{OrchestratorError, Result};
use crate::policy::{DecisionPolicy, PhaseFailure};

/// Context key prefix under which an action's params are stored for its phase.
pub const PARAMS_KEY_PREFIX: &str = "params.";

pub fn params_key(phase: &str) -> String {
    format!("{PARAMS_KEY_PREFIX}{phase}")
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub max_iterations: u32,
    pub max_consecutive_service_errors: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            max_consecutive_service_errors: 3,
        }
    }
}

impl RunnerConfig {
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_max_service_errors(mut self, max: u32) -> Self {
        self.max_consecutive_service_errors = max;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed { reason: String },
    Cancelled,
    IterationLimit,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub target: String,
    pub policy: String,
    pub history: History,
    pub outcome: RunOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Drives one run against one target.
pub struct Runner {
    orchestrator: Orchestrator,
    policy: Box<dyn DecisionPolicy>,
    config: RunnerConfig,
    cancel: CancellationToken,
}

impl Runner {
    pub fn new(orchestrator: Orchestrator, policy: Box<dyn DecisionPolicy>) -> Self {
        Self {
            orchestrator,
            policy,
            config: RunnerConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that stops the loop at the next iteration boundary.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Run the decide/dispatch loop until the policy reports no more work.
    pub async fn run(&mut self, ctx: &ExecutionContext) -> Result<RunReport> {
        let started_at = Utc::now();
        let mut history = History::new();
        let outcome = self.drive(ctx, &mut history).await?;
        Ok(self.report(ctx, history, outcome, started_at))
    }

    /// Run `independent` phases in parallel first, then continue with the
    /// serial loop.
    pub async fn run_concurrent(
        &mut self,
        ctx: &ExecutionContext,
        independent: &[String],
    ) -> Result<RunReport> {
        let started_at = Utc::now();
        let mut history = self.fan_out(ctx, independent).await?;

        if self.cancel.is_cancelled() {
            return Ok(self.report(ctx, history, RunOutcome::Cancelled, started_at));
        }

        let outcome = self.drive(ctx, &mut history).await?;
        Ok(self.report(ctx, history, outcome, started_at))
    }

    /// Run exactly `phases`, in order, without consulting the policy.
    /// Failures are recorded and the sequence continues.
    pub async fn run_sequence(
        &mut self,
        ctx: &ExecutionContext,
        phases: &[String],
    ) -> Result<RunReport> {
        self.ensure_registered(phases)?;

        let started_at = Utc::now();
        let mut history = History::new();
        for name in phases {
            if self.cancel.is_cancelled() {
                info!("Run cancelled");
                return Ok(self.report(ctx, history, RunOutcome::Cancelled, started_at));
            }
            let action = Action::run(name.as_str(), "requested phase");
            if let Err(failure) = self.execute(ctx, &mut history, &action).await? {
                warn!(phase = %name, error = %failure.error, "Requested phase failed, continuing");
            }
        }

        let outcome = RunOutcome::Completed {
            reason: "requested phases finished".to_string(),
        };
        Ok(self.report(ctx, history, outcome, started_at))
    }

    fn report(
        &self,
        ctx: &ExecutionContext,
        history: History,
        outcome: RunOutcome,
        started_at: DateTime<Utc>,
    ) -> RunReport {
        RunReport {
            run_id: Uuid::new_v4(),
            target: ctx.target().to_string(),
            policy: self.policy.name().to_string(),
            history,
            outcome,
            started_at,
            finished_at: Utc::now(),
        }
    }

    fn ensure_registered(&self, phases: &[String]) -> Result<()> {
        match phases.iter().find(|name| !self.orchestrator.contains(name)) {
            Some(missing) => Err(OrchestratorError::PhaseNotFound(missing.clone())),
            None => Ok(()),
        }
    }

    async fn drive(&mut self, ctx: &ExecutionContext, history: &mut History) -> Result<RunOutcome> {
        let mut iterations = 0;
        let mut service_errors = 0;
        let mut pending: Option<Action> = None;

        loop {
            if self.cancel.is_cancelled() {
                info!(iterations, "Run cancelled");
                return Ok(RunOutcome::Cancelled);
            }
            if iterations >= self.config.max_iterations {
                warn!(iterations, "Iteration limit reached");
                return Ok(RunOutcome::IterationLimit);
            }
            iterations += 1;

            let action = match pending.take() {
                Some(action) => action,
                None => match self.policy.decide(ctx, history).await {
                    Ok(Decision::Run(action)) => {
                        service_errors = 0;
                        action
                    }
                    Ok(Decision::Terminal { reason }) => {
                        info!(reason = %reason, results = history.len(), "Run complete");
                        return Ok(RunOutcome::Completed { reason });
                    }
                    Err(e) if e.is_service() => {
                        service_errors += 1;
                        if service_errors >= self.config.max_consecutive_service_errors {
                            error!(error = %e, service_errors, "Decision source keeps failing");
                            return Err(e);
                        }
                        warn!(error = %e, service_errors, "Decision failed, asking again");
                        continue;
                    }
                    Err(e) => return Err(e),
                },
            };

            if action.is_none() {
                debug!(reason = %action.reason, "Nothing to run this iteration");
                continue;
            }

            if let Err(failure) = self.execute(ctx, history, &action).await? {
                let remedy = self.policy.recover(ctx, history, &failure).await;
                match remedy.phase() {
                    Some(phase) => {
                        info!(phase = %phase, reason = %remedy.reason, "Recovering with phase");
                        pending = Some(remedy);
                    }
                    None => info!(reason = %remedy.reason, "No recovery action, continuing"),
                }
            }
        }
    }

    /// Dispatch one action and append its result. The inner `Err` is a phase
    /// failure, already recorded in `history`; the outer one is fatal.
    async fn execute(
        &mut self,
        ctx: &ExecutionContext,
        history: &mut History,
        action: &Action,
    ) -> Result<std::result::Result<(), PhaseFailure>> {
        let Some(phase) = action.phase() else {
            return Ok(Ok(()));
        };

        ctx.insert(params_key(phase), action.params.clone());

        match self.orchestrator.dispatch(phase, ctx.target(), ctx).await {
            Ok(result) => {
                history.push(result);
                Ok(Ok(()))
            }
            Err(e @ OrchestratorError::PhaseNotFound(_)) => Err(e),
            Err(e) => {
                warn!(phase = %phase, error = %e, "Phase failed");
                history.push(PhaseResult::failure(phase, e.to_string()));
                Ok(Err(PhaseFailure::new(Some(phase), e)))
            }
        }
    }

    async fn fan_out(&mut self, ctx: &ExecutionContext, independent: &[String]) -> Result<History> {
        self.ensure_registered(independent)?;
        let mut seen = HashSet::new();
        let independent: Vec<&String> = independent
            .iter()
            .filter(|name| seen.insert(*name))
            .collect();
        info!(phases = ?independent, "Running independent phases in parallel");

        let shared = Arc::new(Mutex::new(History::new()));
        let mut tasks = JoinSet::new();
        for name in independent {
            let orchestrator = self.orchestrator.clone();
            let ctx = ctx.clone();
            let history = Arc::clone(&shared);
            let name = name.clone();
            tasks.spawn(async move {
                let entry = match orchestrator.dispatch(&name, ctx.target(), &ctx).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(phase = %name, error = %e, "Parallel phase failed");
                        PhaseResult::failure(name.as_str(), e.to_string())
                    }
                };
                history.lock().await.push(entry);
                name
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(name) => self.policy.record_execution(&name),
                Err(e) => error!(error = %e, "Parallel phase task aborted"),
            }
        }

        let history = match Arc::try_unwrap(shared) {
            Ok(history) => history.into_inner(),
            Err(shared) => shared.lock().await.clone(),
        };
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Phase;
    use crate::policy::DeterministicPolicy;
    use async_trait::async_trait;
    use serde_json::json;

    struct Echo(&'static str);

    #[async_trait]
    impl Phase for Echo {
        fn name(&self) -> &str {
            self.0
        }

        async fn execute(&self, _target: &str, ctx: &ExecutionContext) -> Result<PhaseResult> {
            let params = ctx.get(&params_key(self.0)).unwrap_or(json!({}));
            Ok(PhaseResult::new(self.0).with("params", params))
        }
    }

    struct Broken(&'static str);

    #[async_trait]
    impl Phase for Broken {
        fn name(&self) -> &str {
            self.0
        }

        async fn execute(&self, _target: &str, _ctx: &ExecutionContext) -> Result<PhaseResult> {
            Err(OrchestratorError::phase_failed(self.0, "connection refused"))
        }
    }

    fn deterministic(names: &[&str]) -> Box<dyn DecisionPolicy> {
        Box::new(DeterministicPolicy::new(
            names.iter().map(|s| s.to_string()).collect(),
        ))
    }

    #[tokio::test]
    async fn test_failed_phase_is_recorded_and_run_continues() {
        let orchestrator = Orchestrator::new()
            .with_phase(Echo("a"))
            .with_phase(Broken("b"))
            .with_phase(Echo("c"));
        let mut runner = Runner::new(orchestrator, deterministic(&["a", "b", "c"]));
        let ctx = ExecutionContext::new("example.com");

        let report = runner.run(&ctx).await.unwrap();
        let phases: Vec<_> = report.history.iter().map(|r| r.phase.as_str()).collect();
        assert_eq!(phases, ["a", "b", "c"]);
        assert!(report.history.as_slice()[1].mentions_failure());
        assert!(matches!(report.outcome, RunOutcome::Completed { .. }));
        assert_eq!(report.policy, "deterministic");
    }

    #[tokio::test]
    async fn test_cancelled_before_first_iteration() {
        let orchestrator = Orchestrator::new().with_phase(Echo("a"));
        let mut runner = Runner::new(orchestrator, deterministic(&["a"]));
        runner.cancellation_token().cancel();

        let report = runner.run(&ExecutionContext::new("example.com")).await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Cancelled);
        assert!(report.history.is_empty());
    }

    #[tokio::test]
    async fn test_iteration_limit() {
        let orchestrator = Orchestrator::new().with_phase(Echo("a")).with_phase(Echo("b"));
        let mut runner = Runner::new(orchestrator, deterministic(&["a", "b"]))
            .with_config(RunnerConfig::default().with_max_iterations(1));

        let report = runner.run(&ExecutionContext::new("example.com")).await.unwrap();
        assert_eq!(report.outcome, RunOutcome::IterationLimit);
        assert_eq!(report.history.len(), 1);
    }

    #[tokio::test]
    async fn test_unregistered_phase_is_surfaced() {
        let orchestrator = Orchestrator::new().with_phase(Echo("a"));
        let mut runner = Runner::new(orchestrator, deterministic(&["a", "ghost"]));

        let err = runner
            .run(&ExecutionContext::new("example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::PhaseNotFound(ref name) if name == "ghost"));
    }

    #[tokio::test]
    async fn test_sequence_runs_in_order_past_failures() {
        let orchestrator = Orchestrator::new()
            .with_phase(Echo("a"))
            .with_phase(Broken("b"));
        let mut runner = Runner::new(orchestrator, deterministic(&[]));
        let ctx = ExecutionContext::new("example.com");

        let report = runner
            .run_sequence(&ctx, &["b".to_string(), "a".to_string(), "b".to_string()])
            .await
            .unwrap();
        let phases: Vec<_> = report.history.iter().map(|r| r.phase.as_str()).collect();
        assert_eq!(phases, ["b", "a", "b"]);

        let err = runner
            .run_sequence(&ctx, &["missing".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::PhaseNotFound(_)));
    }

    #[tokio::test]
    async fn test_params_reach_phase_through_context() {
        let orchestrator = Orchestrator::new().with_phase(Echo("a"));
        let mut runner = Runner::new(orchestrator, deterministic(&[]));
        let ctx = ExecutionContext::new("example.com");
        let mut history = History::new();

        let mut action = Action::run("a", "test");
        action.params.insert("depth".to_string(), json!(2));
        runner.execute(&ctx, &mut history, &action).await.unwrap().unwrap();

        assert_eq!(ctx.get("params.a"), Some(json!({"depth": 2})));
        assert_eq!(history.as_slice()[0].get("params"), Some(&json!({"depth": 2})));
    }

    #[tokio::test]
    async fn test_params_do_not_carry_over_between_executions() {
        let orchestrator = Orchestrator::new().with_phase(Echo("a"));
        let mut runner = Runner::new(orchestrator, deterministic(&[]));
        let ctx = ExecutionContext::new("example.com");
        let mut history = History::new();

        let mut first = Action::run("a", "deep scan");
        first.params.insert("depth".to_string(), json!(5));
        runner.execute(&ctx, &mut history, &first).await.unwrap().unwrap();
        runner
            .execute(&ctx, &mut history, &Action::run("a", "retry"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(ctx.get("params.a"), Some(json!({})));
        assert_eq!(history.as_slice()[1].get("params"), Some(&json!({})));
    }

    #[test]
    fn test_report_serializes_outcome_tag() {
        let outcome = serde_json::to_value(RunOutcome::Completed {
            reason: "done".to_string(),
        })
        .unwrap();
        assert_eq!(outcome, json!({"status": "completed", "reason": "done"}));
        assert_eq!(
            serde_json::to_value(RunOutcome::IterationLimit).unwrap(),
            json!({"status": "iteration_limit"})
        );
    }
}
