//! Scheduler error types.

use nimbus_lifecycle::LifecycleError;
use thiserror::Error;

/// Errors that can occur during scheduling operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no node has capacity for {cpu} cpu, {memory_mb} MB")]
    NoCapacity { cpu: f64, memory_mb: u64 },

    #[error("workload not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
