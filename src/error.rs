use crate::priority::Policy;
use std::io;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised synchronously by the thread operations which detected them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `start` was called while a previous launch is still running.
    #[error("thread already running")]
    AlreadyRunning,

    /// The OS refused to create the thread.
    #[error("cannot start thread: {0}")]
    ThreadCreation(#[source] io::Error),

    /// The OS rejected a priority or policy for a live thread.
    #[error("cannot set thread priority: {0}")]
    PrioritySet(#[source] io::Error),

    /// The host does not support the scheduling policy.
    #[error("no priority range for scheduling policy {0}")]
    PriorityRange(Policy),

    #[error(transparent)]
    Affinity(#[from] AffinityError),

    /// Reaping the exited OS thread failed.
    #[error("cannot join thread: {0}")]
    Join(#[source] io::Error),

    /// A native wait failed for a reason other than signal interruption.
    #[error("sleep failed: {0}")]
    Sleep(#[source] io::Error),
}

/// Error type for the affinity operations.
#[derive(Debug, thiserror::Error)]
pub enum AffinityError {
    /// The host has no way of binding a thread to a cpu.
    #[error("thread affinity is not supported on this platform")]
    Unsupported,

    /// The cpu index is outside of the logical cpus configured in the system.
    #[error("cpu {cpu} out of range, the system has {count} logical cpus")]
    InvalidCpu { cpu: usize, count: usize },

    #[error("failed to set affinity: {0}")]
    Os(#[source] io::Error),
}
