use serde::{Deserialize, Serialize};
use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug, Clone, Deserialize, Serialize, PartialEq)]
pub enum AgentError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Budget tokens {0} exhausted")]
    BudgetExhausted(i64),

    #[error("Failed to perform step, max attempts reached")]
    MaxAttemptsReached,

    #[error("Cache missing but LOWIRE_FORCE_CACHE is set")]
    CacheMissing,

    #[error("Tool not found: {0}")]
    ToolNotFound(String),
}

pub type AgentResult<T> = Result<T, AgentError>;
