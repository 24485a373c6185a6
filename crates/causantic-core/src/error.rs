//! Error taxonomy surfaced by the engine's public API.

use std::fmt;

/// Errors the engine can surface to callers.
///
/// `BudgetExhausted` is deliberately absent: it is a soft signal carried
/// inside a successful response (`Response::truncated`,
/// `ReconstructResult::truncated`), never an error variant.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("embedding model degraded: {0}")]
    DegradedModel(String),

    #[error("cancelled")]
    Cancelled,
}

impl EngineError {
    /// Exit-code mapping used by CLI-layer collaborators: 2 = invalid
    /// input, 3 = invalid configuration / store unavailable, 1 = other.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::InvalidInput(_) => 2,
            EngineError::StoreUnavailable(_) => 3,
            _ => 1,
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::StoreUnavailable(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::InvalidInput(e.to_string())
    }
}

/// Wraps a `tokio::task::JoinError` from a `spawn_blocking` store call.
#[derive(Debug)]
pub struct TaskPanic(pub String);

impl fmt::Display for TaskPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store task panicked: {}", self.0)
    }
}

impl From<TaskPanic> for EngineError {
    fn from(e: TaskPanic) -> Self {
        EngineError::StoreUnavailable(e.0)
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
