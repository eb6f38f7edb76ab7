//! Cluster scheduler: picks a node for each workload and remembers where
//! it went.
//!
//! The `ClusterScheduler`:
//! - Scores every admissible node and delegates to the tightest fit
//! - Tracks unit id → node id so later calls reach the right node
//! - Drops assignments when a node's sweep expires a workload

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use nimbus_backend::ExecutionBackend;
use nimbus_core::{ContainerInfo, ContainerSpec, NodeConfig, NodeId, WorkloadId};
use nimbus_lifecycle::{ExpirationCallback, ExpirationFuture, LifecycleError};

use crate::error::{SchedulerError, SchedulerResult};
use crate::node::{Node, NodeSummary};
use crate::scorer::{NodeResources, rank_nodes};

type Assignments = Arc<Mutex<HashMap<WorkloadId, NodeId>>>;

/// Places workloads on a fixed set of nodes.
///
/// The assignment lock is held for the whole of `schedule` and
/// `terminate`, so placements are serialized cluster-wide.
pub struct ClusterScheduler {
    nodes: Vec<Node>,
    /// Active workloads: unit id → owning node.
    assignments: Assignments,
}

impl ClusterScheduler {
    /// Build one node per config entry, all driving the same backend.
    ///
    /// The backend must hand out unit ids that are unique across nodes.
    pub fn new(configs: &[NodeConfig], backend: Arc<dyn ExecutionBackend>) -> Self {
        let assignments: Assignments = Arc::new(Mutex::new(HashMap::new()));
        let nodes = configs
            .iter()
            .map(|config| {
                let callback = expiration_cleanup(assignments.clone());
                Node::new(config, backend.clone(), Some(callback))
            })
            .collect();
        Self { nodes, assignments }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id() == id)
    }

    /// Place `spec` on the best-fitting node.
    ///
    /// The workload's name is replaced with a fresh UUID, which also keys
    /// its reservation. A failure on the chosen node is returned as is.
    pub async fn schedule(&self, mut spec: ContainerSpec) -> SchedulerResult<ContainerInfo> {
        let mut assignments = self.assignments.lock().await;
        let req = spec.resources();

        let candidates: Vec<NodeResources> = self
            .nodes
            .iter()
            .filter(|n| n.ledger().can_allocate(&req))
            .map(Node::resources)
            .collect();

        let Some(best) = rank_nodes(&candidates, &req).into_iter().next() else {
            warn!(cpu = req.cpu, memory_mb = req.memory_mb, "no node has capacity");
            return Err(SchedulerError::NoCapacity {
                cpu: req.cpu,
                memory_mb: req.memory_mb,
            });
        };
        let Some(node) = self.node(&best.node_id) else {
            return Err(SchedulerError::NoCapacity {
                cpu: req.cpu,
                memory_mb: req.memory_mb,
            });
        };

        spec.name = Uuid::new_v4().to_string();
        debug!(node_id = %best.node_id, score = best.score, name = %spec.name, "node selected");

        let info = node.manager().provision(spec).await?;
        if let Some(previous) = assignments.insert(info.id.clone(), node.id().to_string()) {
            warn!(unit_id = %info.id, %previous, "unit id reassigned");
        }

        info!(unit_id = %info.id, node_id = %info.node_id, name = %info.name, "workload scheduled");
        Ok(info)
    }

    /// Terminate a workload on whichever node owns it.
    pub async fn terminate(&self, id: &str) -> SchedulerResult<ContainerInfo> {
        let mut assignments = self.assignments.lock().await;
        let node_id = assignments
            .get(id)
            .cloned()
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;
        let Some(node) = self.node(&node_id) else {
            assignments.remove(id);
            return Err(SchedulerError::NotFound(id.to_string()));
        };

        match node.manager().terminate(id).await {
            Ok(info) => {
                assignments.remove(id);
                Ok(info)
            }
            Err(LifecycleError::NotFound(_)) => {
                // Expired between the lookup and the call.
                assignments.remove(id);
                debug!(unit_id = %id, %node_id, "dropped stale assignment");
                Err(SchedulerError::NotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The record for `id`, from its owning node.
    pub async fn status(&self, id: &str) -> SchedulerResult<ContainerInfo> {
        let node_id = {
            let assignments = self.assignments.lock().await;
            assignments
                .get(id)
                .cloned()
                .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?
        };
        let node = self
            .node(&node_id)
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;

        node.manager().status(id).await.map_err(|e| match e {
            LifecycleError::NotFound(id) => SchedulerError::NotFound(id),
            other => other.into(),
        })
    }

    /// Every active workload across all nodes.
    pub async fn list_all(&self) -> Vec<ContainerInfo> {
        let mut all = Vec::new();
        for node in &self.nodes {
            all.extend(node.manager().list_active().await);
        }
        all
    }

    pub async fn node_summaries(&self) -> Vec<NodeSummary> {
        let mut summaries = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            summaries.push(node.summary().await);
        }
        summaries
    }

    pub async fn assignment_count(&self) -> usize {
        self.assignments.lock().await.len()
    }

    /// Start every node's expiration sweep.
    pub fn start_expiration_sweeps(
        &self,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        let handles: Vec<JoinHandle<()>> = self
            .nodes
            .iter()
            .map(|n| n.manager().start_expiration_sweep(interval, shutdown.clone()))
            .collect();
        info!(nodes = handles.len(), ?interval, "expiration sweeps started");
        handles
    }
}

/// Callback that drops the assignment of an expired unit.
fn expiration_cleanup(assignments: Assignments) -> ExpirationCallback {
    Arc::new(move |node_id: NodeId, unit_id: WorkloadId| -> ExpirationFuture {
        let assignments = assignments.clone();
        Box::pin(async move {
            let mut assignments = assignments.lock().await;
            if assignments.get(&unit_id) == Some(&node_id) {
                assignments.remove(&unit_id);
                debug!(%unit_id, %node_id, "assignment removed after expiry");
            }
        })
    })
}
