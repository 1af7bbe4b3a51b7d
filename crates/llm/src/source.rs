use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::{LlmError, LlmResult};

/// Deadline applied to every decision request unless configured otherwise.
pub const DEFAULT_DECISION_TIMEOUT: Duration = Duration::from_secs(30);

/// System instruction sent alongside every decision request.
pub const ORCHESTRATOR_SYSTEM_PROMPT: &str =
    "You are a penetration testing orchestration agent. Always respond with valid JSON.";

/// A text-in, text-out oracle the orchestrator asks for its next move.
///
/// Replies are free text and may be malformed; callers are expected to repair
/// them rather than trust them.
#[async_trait]
pub trait DecisionSource: Send + Sync {
    async fn send(&self, prompt: &str) -> LlmResult<String>;

    /// Same as [`send`](Self::send) but bounded by `timeout`. Expiry is
    /// reported as [`LlmError::Timeout`], the same kind as any other transport
    /// failure.
    async fn send_with_timeout(&self, prompt: &str, timeout: Duration) -> LlmResult<String> {
        match tokio::time::timeout(timeout, self.send(prompt)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Decision request timed out");
                Err(LlmError::Timeout { after: timeout })
            }
        }
    }
}
