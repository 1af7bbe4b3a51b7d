//! Name-keyed phase registry and dispatcher.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use recon_core::{ExecutionContext, PhaseResult};
use tracing::{debug, info, warn};

use crate::error::{OrchestratorError, Result};

use super::phase::Phase;

/// Holds phases by name and dispatches to them.
///
/// Dispatch does nothing beyond delegating: no retries, no bookkeeping. The
/// phase's result or error is returned as-is.
#[derive(Default, Clone)]
pub struct Orchestrator {
    phases: HashMap<String, Arc<dyn Phase>>,
    order: Vec<String>,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a phase, replacing any phase already registered under the same name.
    pub fn register(&mut self, phase: Arc<dyn Phase>) {
        let name = phase.name().to_string();
        if self.phases.insert(name.clone(), phase).is_some() {
            warn!(phase = %name, "Replacing previously registered phase");
        } else {
            self.order.push(name);
        }
    }

    pub fn with_phase(mut self, phase: impl Phase + 'static) -> Self {
        self.register(Arc::new(phase));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.phases.contains_key(name)
    }

    /// Registered names in registration order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// `(name, description)` pairs in registration order.
    pub fn catalogue(&self) -> Vec<(&str, &str)> {
        self.order
            .iter()
            .filter_map(|name| self.phases.get(name))
            .map(|phase| (phase.name(), phase.description()))
            .collect()
    }

    pub async fn dispatch(
        &self,
        name: &str,
        target: &str,
        ctx: &ExecutionContext,
    ) -> Result<PhaseResult> {
        let phase = self
            .phases
            .get(name)
            .ok_or_else(|| OrchestratorError::PhaseNotFound(name.to_string()))?;

        info!(phase = %name, target = %target, "Dispatching phase");
        let started = Instant::now();
        let result = phase.execute(target, ctx).await;

        match &result {
            Ok(output) => debug!(
                phase = %name,
                duration_ms = started.elapsed().as_millis() as u64,
                fields = output.data.len(),
                "Phase returned"
            ),
            Err(e) => debug!(
                phase = %name,
                duration_ms = started.elapsed().as_millis() as u64,
                error = %e,
                "Phase returned an error"
            ),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Fixed {
        name: &'static str,
        marker: &'static str,
    }

    #[async_trait]
    impl Phase for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "returns a fixed marker"
        }

        async fn execute(&self, _target: &str, _ctx: &ExecutionContext) -> Result<PhaseResult> {
            Ok(PhaseResult::new(self.name).with("marker", self.marker))
        }
    }

    struct Broken;

    #[async_trait]
    impl Phase for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn execute(&self, _target: &str, _ctx: &ExecutionContext) -> Result<PhaseResult> {
            Err(OrchestratorError::phase_failed("broken", "socket closed"))
        }
    }

    #[tokio::test]
    async fn test_dispatch_unknown_phase() {
        let orchestrator = Orchestrator::new();
        let ctx = ExecutionContext::new("example.com");

        let err = orchestrator
            .dispatch("missing", "example.com", &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::PhaseNotFound(ref n) if n == "missing"));
    }

    #[tokio::test]
    async fn test_register_overwrites_on_collision() {
        let orchestrator = Orchestrator::new()
            .with_phase(Fixed {
                name: "a",
                marker: "first",
            })
            .with_phase(Fixed {
                name: "b",
                marker: "b",
            })
            .with_phase(Fixed {
                name: "a",
                marker: "second",
            });
        let ctx = ExecutionContext::new("example.com");

        assert_eq!(orchestrator.names(), &["a".to_string(), "b".to_string()]);
        let result = orchestrator.dispatch("a", "example.com", &ctx).await.unwrap();
        assert_eq!(result.get("marker").unwrap(), "second");
    }

    #[tokio::test]
    async fn test_phase_error_returned_verbatim() {
        let orchestrator = Orchestrator::new().with_phase(Broken);
        let ctx = ExecutionContext::new("example.com");

        let err = orchestrator
            .dispatch("broken", "example.com", &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Phase broken failed: socket closed");
    }

    #[test]
    fn test_catalogue_order() {
        let orchestrator = Orchestrator::new().with_phase(Broken).with_phase(Fixed {
            name: "fixed",
            marker: "m",
        });

        let catalogue = orchestrator.catalogue();
        assert_eq!(catalogue[0], ("broken", ""));
        assert_eq!(catalogue[1], ("fixed", "returns a fixed marker"));
    }
}
