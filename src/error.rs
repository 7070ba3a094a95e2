//! Error taxonomy for progress operations.
//!
//! Every fallible operation on a [`TaskRegistry`](crate::TaskRegistry) returns
//! [`Result`]. Identity and validation failures are reported immediately and never
//! swallowed: they always indicate caller misuse.
//!
//! Closing a task twice is deliberately *not* an error; see
//! [`TaskHandle::close`](crate::TaskHandle::close).

use crate::task::TaskId;

/// Errors raised by the progress engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProgressError {
    /// The task identity is not (or no longer) present in the registry.
    #[error("unknown progress task {0}")]
    UnknownTask(TaskId),

    /// `advance` was called with a negative delta. The task is left unchanged.
    #[error("cannot advance progress by a negative delta ({0})")]
    NegativeDelta(i64),

    /// A total was negative, NaN or infinite.
    #[error("invalid progress total {0}")]
    InvalidTotal(f64),

    /// The task already reached a terminal status and rejects further mutation.
    #[error("progress task {0} is already finished")]
    TaskFinished(TaskId),

    /// The task cannot be detached yet: it is still running, or no snapshot has
    /// observed its terminal status.
    #[error("progress task {0} cannot be removed before it is finished and flushed")]
    NotRemovable(TaskId),
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = ProgressError> = std::result::Result<T, E>;
