use std::time::Duration;

use thiserror::Error;

/// Failure talking to the decision source.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Decision source API error: {message}")]
    Api {
        message: String,
        status_code: Option<u16>,
    },

    #[error("Decision source rate limited, retry after {retry_after:?}s")]
    RateLimited { retry_after: Option<u64> },

    #[error("Decision source request timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("Decision source returned an empty response")]
    EmptyResponse,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl LlmError {
    pub fn api(message: impl Into<String>, status_code: Option<u16>) -> Self {
        Self::Api {
            message: message.into(),
            status_code,
        }
    }

    /// Errors worth retrying against the same endpoint.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Api {
                status_code: Some(code),
                ..
            } => *code >= 500,
            _ => false,
        }
    }
}

pub type LlmResult<T> = Result<T, LlmError>;
