//! Error types for process execution

use thiserror::Error;

/// Errors raised while spawning or waiting on a child process.
///
/// A child that runs to completion with a non-zero exit status is NOT an
/// error at this layer; callers inspect [`crate::ProcessOutput::success`].
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("failed to spawn '{program}': {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("failed to wait for '{program}': {reason}")]
    WaitFailed { program: String, reason: String },

    #[error("'{program}' timed out after {timeout_seconds} seconds")]
    Timeout {
        program: String,
        timeout_seconds: u64,
    },

    #[error("'{program}' was cancelled")]
    Cancelled { program: String },
}

impl RunnerError {
    /// True when the failure came from a timeout rather than the process itself.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
