//! Core abstractions for phase dispatch.
//!
//! - [`Phase`] - Trait that all reconnaissance phases implement
//! - [`Orchestrator`] - Name-keyed registry that dispatches to phases

mod phase;
mod registry;

pub use phase::Phase;
pub use registry::Orchestrator;
