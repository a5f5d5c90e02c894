// Scheduling Module
// Long-lived workers chosen by least fatigue, with a synchronous batch barrier

pub mod pool;
pub mod worker;

use thiserror::Error;

// Re-export key types
pub use pool::{random_fatigue_factors, task, Pool, Task, TaskError};
pub use worker::{Job, Worker, WorkerReport};

/// Errors raised by the worker pool
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchedulerError {
    #[error("Worker {0} is busy")]
    WorkerBusy(usize),

    #[error("Worker {0} is no longer running")]
    WorkerGone(usize),

    #[error("Failed to start worker {id}: {message}")]
    Spawn { id: usize, message: String },

    #[error("Cannot shut down while worker {0} is busy")]
    ShutdownWhileBusy(usize),

    #[error("Cannot shut down with {0} task(s) in flight")]
    ShutdownWithTasksInFlight(usize),

    #[error("Pool has been shut down")]
    Closed,

    #[error("{failed} task(s) failed, first: {first}")]
    TaskFailed { failed: usize, first: String },

    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;
