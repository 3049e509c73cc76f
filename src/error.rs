//! Crate-level error types.
//!
//! The public API surfaces typed enums; `Other` is the escape hatch for
//! failures outside the driver/workflow taxonomy. Mid-run failures follow
//! the partial-progress principle: accumulated results are emitted and the
//! run terminates gracefully instead of discarding work, so most error
//! kinds here are reported, logged, and survived rather than propagated.

use thiserror::Error;

use crate::driver::DriverError;

/// Errors surfaced by the workflow interpreter API.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Malformed workflow detected at construction, before `run`.
    #[error("workflow validation failed: {0}")]
    Validation(String),

    /// `run` was called while a previous run is still active.
    #[error("an interpretation run is already in progress")]
    RunActive,

    /// A dispatched action failed and was not recoverable in soft mode.
    #[error("action {action:?} failed: {reason}")]
    ActionFailed { action: String, reason: String },

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Convenience alias for interpreter results.
pub type WorkflowResult<T> = Result<T, WorkflowError>;
