//! Lifecycle error types.

use nimbus_backend::{BackendError, BackendPhase};
use thiserror::Error;

/// Errors from provisioning, terminating and querying workloads.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("insufficient resources on {node_id}: requested {cpu} cpu, {memory_mb} MB")]
    InsufficientResources {
        node_id: String,
        cpu: f64,
        memory_mb: u64,
    },

    #[error("failed to reserve resources for {0}")]
    ReservationFailed(String),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("workload not found: {0}")]
    NotFound(String),
}

impl LifecycleError {
    /// The backend phase that failed, for backend errors.
    pub fn backend_phase(&self) -> Option<BackendPhase> {
        match self {
            LifecycleError::Backend(e) => Some(e.phase),
            _ => None,
        }
    }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;
