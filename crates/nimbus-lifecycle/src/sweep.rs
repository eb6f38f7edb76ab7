//! Expiration sweep: background task that terminates workloads whose TTL
//! has elapsed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use nimbus_core::{NodeId, WorkloadId};

use crate::error::LifecycleError;
use crate::manager::LifecycleManager;

/// Callback invoked after a workload is terminated because its TTL elapsed.
///
/// Receives the node id and the unit id. The scheduler uses this to drop
/// its assignment for the unit.
pub type ExpirationCallback = Arc<dyn Fn(NodeId, WorkloadId) -> ExpirationFuture + Send + Sync>;

pub type ExpirationFuture = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

impl LifecycleManager {
    /// Terminate every workload whose TTL has elapsed.
    ///
    /// Expired ids are collected under the record lock, then terminated one
    /// at a time with the lock released in between. Failures are logged and
    /// the workload is retried on the next sweep. Returns the ids that were
    /// terminated.
    pub async fn sweep_expired(&self) -> Vec<WorkloadId> {
        let expired = self.expired_ids(Instant::now()).await;
        if expired.is_empty() {
            return Vec::new();
        }
        debug!(node_id = %self.node_id(), count = expired.len(), "sweeping expired workloads");

        let mut terminated = Vec::with_capacity(expired.len());
        for id in expired {
            match self.terminate(&id).await {
                Ok(info) => {
                    info!(
                        node_id = %self.node_id(),
                        unit_id = %id,
                        name = %info.name,
                        ttl_secs = info.ttl.as_secs_f64(),
                        "expired workload terminated"
                    );
                    if let Some(ref cb) = self.on_expired {
                        cb(self.node_id().to_string(), id.clone()).await;
                    }
                    terminated.push(id);
                }
                Err(e) => log_sweep_failure(self.node_id(), &id, &e),
            }
        }
        terminated
    }

    /// Spawn the periodic sweep. Runs until `shutdown` changes or its
    /// sender is dropped.
    pub fn start_expiration_sweep(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            debug!(node_id = %manager.node_id(), ?interval, "expiration sweep starting");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        manager.sweep_expired().await;
                    }
                    _ = shutdown.changed() => {
                        debug!(node_id = %manager.node_id(), "expiration sweep shutting down");
                        break;
                    }
                }
            }
        })
    }
}

fn log_sweep_failure(node_id: &str, unit_id: &str, err: &LifecycleError) {
    match err {
        // Terminated by a caller between collection and teardown.
        LifecycleError::NotFound(_) => {
            debug!(%node_id, %unit_id, "expired workload already gone");
        }
        other => {
            warn!(
                %node_id,
                %unit_id,
                error = %other,
                "failed to terminate expired workload, retrying next sweep"
            );
        }
    }
}
