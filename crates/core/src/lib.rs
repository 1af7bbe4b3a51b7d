//! Domain model shared by the orchestration engine, the phases and the CLI.

pub mod domain;
pub mod error;

pub use domain::*;
pub use error::{CoreError, Result};
