//! A cluster node: a ledger plus the lifecycle manager that draws on it.

use std::sync::Arc;

use serde::Serialize;

use nimbus_backend::ExecutionBackend;
use nimbus_core::{NodeConfig, NodeId};
use nimbus_ledger::ResourceLedger;
use nimbus_lifecycle::{ExpirationCallback, LifecycleManager};

use crate::scorer::NodeResources;

pub struct Node {
    id: NodeId,
    ledger: Arc<ResourceLedger>,
    manager: Arc<LifecycleManager>,
}

impl Node {
    pub fn new(
        config: &NodeConfig,
        backend: Arc<dyn ExecutionBackend>,
        on_expired: Option<ExpirationCallback>,
    ) -> Self {
        let ledger = Arc::new(ResourceLedger::new(config.cpu, config.memory_mb));
        let mut manager = LifecycleManager::new(config.id.clone(), backend, ledger.clone());
        if let Some(callback) = on_expired {
            manager = manager.with_expiration_callback(callback);
        }
        Self {
            id: config.id.clone(),
            ledger,
            manager: Arc::new(manager),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn ledger(&self) -> &Arc<ResourceLedger> {
        &self.ledger
    }

    pub fn manager(&self) -> &Arc<LifecycleManager> {
        &self.manager
    }

    /// Snapshot for scoring.
    pub fn resources(&self) -> NodeResources {
        NodeResources {
            node_id: self.id.clone(),
            total: self.ledger.total(),
            used: self.ledger.usage(),
        }
    }

    pub async fn summary(&self) -> NodeSummary {
        let used = self.ledger.usage();
        NodeSummary {
            id: self.id.clone(),
            backend: self.manager.backend().kind().to_string(),
            total_cpu: self.ledger.total_cpu(),
            total_memory_mb: self.ledger.total_memory_mb(),
            used_cpu: used.cpu,
            used_memory_mb: used.memory_mb,
            workloads: self.manager.active_count().await,
        }
    }
}

/// Read-only view of a node for operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSummary {
    pub id: NodeId,
    pub backend: String,
    pub total_cpu: f64,
    pub total_memory_mb: u64,
    pub used_cpu: f64,
    pub used_memory_mb: u64,
    pub workloads: usize,
}
