//! Crate-wide error type.
//!
//! The taxonomy follows spec §7: transient store errors are retried by the
//! caller (Scheduler/Worker loops log and continue), invalid-input errors
//! never reach the store, and process/io errors are specific to the Worker's
//! subprocess supervision.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("job {0} not found")]
    JobNotFound(i64),

    #[error("dispatch {0} not found")]
    DispatchNotFound(i64),

    #[error("job {0} is inactive")]
    JobInactive(i64),

    #[error("claim conflict: dispatch {0} was already claimed")]
    ClaimConflict(i64),

    #[error("process error: {0}")]
    Process(#[from] std::io::Error),

    #[error("script not found: {0}")]
    ScriptNotFound(String),
}

pub type Result<T> = std::result::Result<T, TriggerError>;
