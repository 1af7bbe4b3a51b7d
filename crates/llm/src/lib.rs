//! Clients for the external text-generating decision source.
//!
//! Everything the orchestrator needs is behind [`DecisionSource`]; the HTTP
//! clients here are the production implementations.

pub mod client;
pub mod error;
pub mod ollama;
pub mod source;
pub mod types;

pub use client::ChatClient;
pub use error::{LlmError, LlmResult};
pub use ollama::OllamaClient;
pub use source::{DecisionSource, DEFAULT_DECISION_TIMEOUT, ORCHESTRATOR_SYSTEM_PROMPT};
pub use types::*;
