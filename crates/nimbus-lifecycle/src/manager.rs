//! Lifecycle manager: provisions, terminates and tracks workloads on a node.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use nimbus_backend::{BackendError, ExecutionBackend, UnitSpec};
use nimbus_core::{ContainerInfo, ContainerSpec, ContainerStatus, NodeId, WorkloadId, epoch_secs};
use nimbus_ledger::ResourceLedger;

use crate::error::{LifecycleError, LifecycleResult};
use crate::sweep::ExpirationCallback;

/// A live workload record plus the monotonic instant it started.
#[derive(Debug, Clone)]
pub(crate) struct Tracked {
    pub(crate) info: ContainerInfo,
    pub(crate) started: Instant,
}

impl Tracked {
    /// Expired when a TTL is set and `started + ttl` lies strictly before `now`.
    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        self.info.expires() && self.started + self.info.ttl < now
    }
}

/// Owns the workload records of one node.
///
/// All mutations go through one `tokio::sync::Mutex`, held across backend
/// calls, so provisioning and termination on a node are serialized.
pub struct LifecycleManager {
    node_id: NodeId,
    backend: Arc<dyn ExecutionBackend>,
    ledger: Arc<ResourceLedger>,
    /// Active workloads: unit id → record.
    pub(crate) records: Mutex<HashMap<WorkloadId, Tracked>>,
    pub(crate) on_expired: Option<ExpirationCallback>,
}

impl LifecycleManager {
    pub fn new(
        node_id: impl Into<NodeId>,
        backend: Arc<dyn ExecutionBackend>,
        ledger: Arc<ResourceLedger>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            backend,
            ledger,
            records: Mutex::new(HashMap::new()),
            on_expired: None,
        }
    }

    /// Set a callback fired after each TTL-triggered termination.
    pub fn with_expiration_callback(mut self, callback: ExpirationCallback) -> Self {
        self.on_expired = Some(callback);
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn ledger(&self) -> &Arc<ResourceLedger> {
        &self.ledger
    }

    pub fn backend(&self) -> &Arc<dyn ExecutionBackend> {
        &self.backend
    }

    /// Reserve resources, launch the unit and record it as running.
    ///
    /// The reservation is keyed by `spec.name`. Any failure after the
    /// reservation is made releases it before returning.
    pub async fn provision(&self, spec: ContainerSpec) -> LifecycleResult<ContainerInfo> {
        let mut records = self.records.lock().await;
        let resources = spec.resources();

        if !self.ledger.can_allocate(&resources) {
            return Err(LifecycleError::InsufficientResources {
                node_id: self.node_id.clone(),
                cpu: spec.cpu,
                memory_mb: spec.memory_mb,
            });
        }
        if !self.ledger.allocate(&spec.name, &resources) {
            return Err(LifecycleError::ReservationFailed(spec.name.clone()));
        }

        let unit_id = match self.launch(&spec).await {
            Ok(id) => id,
            Err(e) => {
                self.ledger.release(&spec.name);
                warn!(
                    node_id = %self.node_id,
                    name = %spec.name,
                    phase = %e.phase,
                    error = %e.message,
                    "provisioning failed, reservation released"
                );
                return Err(e.into());
            }
        };

        let info = ContainerInfo {
            id: unit_id.clone(),
            name: spec.name,
            image: spec.image,
            cpu: spec.cpu,
            memory_mb: spec.memory_mb,
            node_id: self.node_id.clone(),
            created_at: epoch_secs(),
            status: ContainerStatus::Running,
            ttl: spec.ttl,
        };

        records.insert(
            unit_id.clone(),
            Tracked {
                info: info.clone(),
                started: Instant::now(),
            },
        );

        info!(
            node_id = %self.node_id,
            unit_id = %unit_id,
            name = %info.name,
            image = %info.image,
            cpu = info.cpu,
            memory_mb = info.memory_mb,
            "workload provisioned"
        );
        Ok(info)
    }

    /// Ensure the image, create the unit and start it.
    ///
    /// A unit that was created but failed to start is removed before the
    /// start error is returned.
    async fn launch(&self, spec: &ContainerSpec) -> Result<String, BackendError> {
        self.backend.ensure_image(&spec.image).await?;

        let unit_spec = UnitSpec::from_container(spec);
        let unit_id = self.backend.create_unit(&unit_spec).await?;

        if let Err(start_err) = self.backend.start_unit(&unit_id).await {
            if let Err(e) = self.backend.remove_unit(&unit_id).await {
                warn!(
                    node_id = %self.node_id,
                    %unit_id,
                    error = %e,
                    "failed to remove unit after start failure"
                );
            }
            return Err(start_err);
        }
        Ok(unit_id)
    }

    /// Stop and remove a workload, then release its reservation.
    ///
    /// If the backend fails to stop or remove the unit, the record and the
    /// reservation are left in place so the call can be retried.
    pub async fn terminate(&self, id: &str) -> LifecycleResult<ContainerInfo> {
        let mut records = self.records.lock().await;
        if !records.contains_key(id) {
            return Err(LifecycleError::NotFound(id.to_string()));
        }

        self.backend.stop_unit(id).await?;
        self.backend.remove_unit(id).await?;

        let Some(tracked) = records.remove(id) else {
            return Err(LifecycleError::NotFound(id.to_string()));
        };
        self.ledger.release(&tracked.info.name);

        let mut info = tracked.info;
        info.status = ContainerStatus::Terminated;
        info!(node_id = %self.node_id, unit_id = %id, name = %info.name, "workload terminated");
        Ok(info)
    }

    /// The record for `id`.
    pub async fn status(&self, id: &str) -> LifecycleResult<ContainerInfo> {
        let records = self.records.lock().await;
        records
            .get(id)
            .map(|t| t.info.clone())
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))
    }

    /// All active records, in no particular order.
    pub async fn list_active(&self) -> Vec<ContainerInfo> {
        let records = self.records.lock().await;
        records.values().map(|t| t.info.clone()).collect()
    }

    pub async fn active_count(&self) -> usize {
        self.records.lock().await.len()
    }

    /// Collect ids of expired workloads. Holds the lock only while scanning.
    pub(crate) async fn expired_ids(&self, now: Instant) -> Vec<WorkloadId> {
        let records = self.records.lock().await;
        records
            .iter()
            .filter(|(_, t)| t.is_expired(now))
            .map(|(id, _)| id.clone())
            .collect()
    }
}
