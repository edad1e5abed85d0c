//! Error types for libclock

use clock_common::Status;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClockError {
    #[error("Invalid delay: {delay_ms}ms (allowed range 0..={max_ms}ms)")]
    InvalidDelay { delay_ms: i64, max_ms: u64 },

    #[error("Alarm message too large: {len} bytes (max {max})")]
    MessageTooLarge { len: usize, max: usize },

    #[error("Malformed alarm message: {0}")]
    MalformedMessage(String),

    #[error("Capacity exceeded: {pending} alarms pending (max {max})")]
    CapacityExceeded { pending: usize, max: usize },

    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("No callback registered for delivery")]
    MissingCallback,

    #[error("Callback panicked during {operation}: {message}")]
    CallbackPanicked { operation: String, message: String },

    #[error("Clock context has been destroyed")]
    ContextDestroyed,

    #[error("Teardown fault: {0}")]
    TeardownFault(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClockError {
    /// Boundary status code for this error.
    pub fn status(&self) -> Status {
        match self {
            ClockError::MissingCallback => Status::MissingCallback,
            _ => Status::Err,
        }
    }

    /// Rejected before reaching the alarm table.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ClockError::InvalidDelay { .. }
                | ClockError::MessageTooLarge { .. }
                | ClockError::MalformedMessage(_)
        )
    }
}
