//! nimbus-api: REST gateway over the cluster scheduler.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/provision` | Place a new workload |
//! | POST | `/terminate/{id}` | Stop and remove a workload |
//! | GET | `/status/{id}` | Get a workload record |
//! | GET | `/list` | List all active workloads |
//! | GET | `/nodes` | Node capacity and usage |
//!
//! Every response uses the `{success, data?, error?}` envelope.

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use nimbus_scheduler::ClusterScheduler;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub scheduler: Arc<ClusterScheduler>,
}

/// Build the API router.
pub fn build_router(scheduler: Arc<ClusterScheduler>) -> Router {
    let state = ApiState { scheduler };

    Router::new()
        .route("/provision", post(handlers::provision))
        .route("/terminate/{id}", post(handlers::terminate))
        .route("/status/{id}", get(handlers::status))
        .route("/list", get(handlers::list))
        .route("/nodes", get(handlers::list_nodes))
        .with_state(state)
}
