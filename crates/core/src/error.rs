use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid budget for {phase}: {limit} (must be positive)")]
    InvalidBudget { phase: String, limit: u32 },

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
