//! Domain types shared by the ledger, lifecycle manager and scheduler.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Identifier of a static node in the topology.
pub type NodeId = String;

/// Identifier of a workload, as assigned by the execution backend.
pub type WorkloadId = String;

/// A CPU + memory quantity.
///
/// Used both as a node's capacity declaration and as the amount a
/// workload requests and reserves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Fractional CPU cores.
    pub cpu: f64,
    /// Memory in MB.
    pub memory_mb: u64,
}

impl ResourceSpec {
    pub fn new(cpu: f64, memory_mb: u64) -> Self {
        Self { cpu, memory_mb }
    }
}

/// A request to provision one workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Requested name. The scheduler overwrites this with a generated id.
    pub name: String,
    /// Image reference handed to the execution backend.
    pub image: String,
    pub cpu: f64,
    pub memory_mb: u64,
    /// Optional command override.
    #[serde(default)]
    pub command: Vec<String>,
    /// Time-to-live. Zero means the workload never expires.
    #[serde(default, with = "crate::duration::serde_str")]
    pub ttl: Duration,
}

impl ContainerSpec {
    /// The resources this request reserves.
    pub fn resources(&self) -> ResourceSpec {
        ResourceSpec::new(self.cpu, self.memory_mb)
    }
}

/// Lifecycle status of a workload record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Created,
    Running,
    Terminated,
    Failed,
}

impl ContainerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerStatus::Created => "created",
            ContainerStatus::Running => "running",
            ContainerStatus::Terminated => "terminated",
            ContainerStatus::Failed => "failed",
        }
    }

    /// Whether `next` is a legal transition from this status.
    ///
    /// `terminated` and `failed` are absorbing.
    pub fn can_transition_to(&self, next: ContainerStatus) -> bool {
        matches!(
            (self, next),
            (ContainerStatus::Created, ContainerStatus::Running)
                | (ContainerStatus::Created, ContainerStatus::Failed)
                | (ContainerStatus::Running, ContainerStatus::Terminated)
        )
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of one provisioned workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Backend-assigned unit id.
    pub id: WorkloadId,
    /// Name the workload was provisioned under; also its reservation key.
    pub name: String,
    pub image: String,
    pub cpu: f64,
    pub memory_mb: u64,
    /// Node the workload runs on.
    pub node_id: NodeId,
    /// Unix timestamp (seconds) when the workload reached `running`.
    pub created_at: u64,
    pub status: ContainerStatus,
    #[serde(with = "crate::duration::serde_str")]
    pub ttl: Duration,
}

impl ContainerInfo {
    /// Whether this workload is subject to TTL expiration.
    pub fn expires(&self) -> bool {
        !self.ttl.is_zero()
    }

    pub fn resources(&self) -> ResourceSpec {
        ResourceSpec::new(self.cpu, self.memory_mb)
    }
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
