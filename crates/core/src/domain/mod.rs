mod action;
mod budget;
mod context;
mod result;

pub use action::{Action, Decision};
pub use budget::{Budget, ExecutionCounts, DEFAULT_PHASE_BUDGET};
pub use context::ExecutionContext;
pub use result::{History, PhaseResult};
