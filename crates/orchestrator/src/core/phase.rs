//! Phase trait: the contract every reconnaissance step implements.

use async_trait::async_trait;
use recon_core::{ExecutionContext, PhaseResult};

use crate::error::Result;

/// An independently dispatchable unit of reconnaissance work.
///
/// Phases are registered by [`name`](Phase::name) into an
/// [`Orchestrator`](super::Orchestrator). They share state with earlier phases
/// through the [`ExecutionContext`] store, and may run concurrently with other
/// phases, so anything they keep outside the store must be `Send + Sync`.
#[async_trait]
pub trait Phase: Send + Sync {
    /// Unique name used for dispatch, budgets and history.
    fn name(&self) -> &str;

    /// One-line description shown to the decision source.
    fn description(&self) -> &str {
        ""
    }

    /// Run the phase against `target`.
    async fn execute(&self, target: &str, ctx: &ExecutionContext) -> Result<PhaseResult>;
}
