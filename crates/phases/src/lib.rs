//! Built-in reconnaissance phases.
//!
//! Each phase is a thin I/O wrapper that writes its findings to the shared
//! [`ExecutionContext`](recon_core::ExecutionContext) under `<phase>.<key>` so
//! later phases can build on them.

pub mod error;
pub mod passive;
pub mod portscan;
pub mod report;
pub mod subdomain;
pub mod target;
pub mod vulnscan;
pub mod webenum;

use orchestrator::Orchestrator;

pub use error::PhaseError;
pub use passive::PassivePhase;
pub use portscan::PortScanPhase;
pub use report::ReportPhase;
pub use subdomain::SubdomainPhase;
pub use vulnscan::VulnScanPhase;
pub use webenum::WebEnumPhase;

/// Registry holding every built-in phase, in default priority order.
pub fn default_phases() -> error::Result<Orchestrator> {
    Ok(Orchestrator::new()
        .with_phase(PassivePhase)
        .with_phase(SubdomainPhase::new()?)
        .with_phase(PortScanPhase::default())
        .with_phase(WebEnumPhase::new()?)
        .with_phase(VulnScanPhase)
        .with_phase(ReportPhase))
}
