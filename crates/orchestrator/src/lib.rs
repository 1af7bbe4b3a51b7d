//! Phase sequencing for multi-phase reconnaissance runs.
//!
//! The [`Orchestrator`] dispatches phases by name, a [`DecisionPolicy`] picks
//! what runs next, and the [`Runner`] ties them together into a loop that
//! survives phase failures and an unreliable decision source.

pub mod core;
pub mod directive;
pub mod error;
pub mod policy;
pub mod prompts;
pub mod runner;
pub mod state_machine;

pub use crate::core::{Orchestrator, Phase};
pub use directive::{repair, Directive, RecoveryReply, RepairError};
pub use error::{OrchestratorError, Result};
pub use policy::{
    default_priority, DecisionPolicy, DeterministicPolicy, ExternalPolicy, PhaseFailure,
    DEFAULT_PRIORITY, DEFAULT_ZERO_COUNT_PHASES,
};
pub use prompts::DecisionPrompts;
pub use runner::{params_key, RunOutcome, RunReport, Runner, RunnerConfig, PARAMS_KEY_PREFIX};
pub use state_machine::{PolicyState, PolicyStateMachine};
