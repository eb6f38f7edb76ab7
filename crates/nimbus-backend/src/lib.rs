//! nimbus-backend: the execution substrate behind each node.
//!
//! The lifecycle manager never talks to a container runtime directly; it
//! drives an [`ExecutionBackend`], which materializes images and creates,
//! starts, stops and removes isolated units.
//!
//! # Implementations
//!
//! - **`InMemoryBackend`**: simulated units with per-phase failure
//!   injection, used by tests and dry runs
//! - **`DockerBackend`**: Docker Engine HTTP API over a unix socket or TCP

pub mod docker;
pub mod error;
pub mod memory;

use std::future::Future;
use std::pin::Pin;

use nimbus_core::ContainerSpec;
use serde::{Deserialize, Serialize};

pub use docker::{DockerBackend, DockerEndpoint};
pub use error::{BackendError, BackendPhase, BackendResult};
pub use memory::InMemoryBackend;

/// Boxed future returned by every [`ExecutionBackend`] method.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = BackendResult<T>> + Send + 'a>>;

/// What the backend needs to create one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSpec {
    pub image: String,
    pub name: String,
    /// Fractional CPU cores.
    pub cpu: f64,
    /// Memory limit in MB.
    pub memory_mb: u64,
    pub command: Vec<String>,
}

impl UnitSpec {
    pub fn from_container(spec: &ContainerSpec) -> Self {
        Self {
            image: spec.image.clone(),
            name: spec.name.clone(),
            cpu: spec.cpu,
            memory_mb: spec.memory_mb,
            command: spec.command.clone(),
        }
    }
}

/// Runtime state of a unit as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Created,
    Running,
    Exited,
    Unknown,
}

impl UnitState {
    /// Map a runtime's state string onto a [`UnitState`].
    pub fn from_runtime(s: &str) -> Self {
        match s {
            "created" => UnitState::Created,
            "running" | "restarting" => UnitState::Running,
            "exited" | "dead" | "removing" | "paused" => UnitState::Exited,
            _ => UnitState::Unknown,
        }
    }
}

/// One row of [`ExecutionBackend::list_units`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: UnitState,
}

/// Result of [`ExecutionBackend::inspect_unit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitDetail {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: UnitState,
    pub cpu: f64,
    pub memory_mb: u64,
}

/// Capability set a node's lifecycle manager drives.
///
/// Implementations must be safe to call from several tasks; the lifecycle
/// manager serializes calls per node but the scheduler may hold backends
/// of different nodes concurrently.
pub trait ExecutionBackend: Send + Sync {
    /// Short name for logs ("memory", "docker").
    fn kind(&self) -> &'static str;

    /// Make sure `image` is available locally, pulling it if needed.
    fn ensure_image<'a>(&'a self, image: &'a str) -> BackendFuture<'a, ()>;

    /// Create a unit and return its backend-assigned id.
    fn create_unit<'a>(&'a self, spec: &'a UnitSpec) -> BackendFuture<'a, String>;

    fn start_unit<'a>(&'a self, id: &'a str) -> BackendFuture<'a, ()>;

    fn stop_unit<'a>(&'a self, id: &'a str) -> BackendFuture<'a, ()>;

    /// Remove a unit, stopping it first if it is still running.
    fn remove_unit<'a>(&'a self, id: &'a str) -> BackendFuture<'a, ()>;

    /// Diagnostics: every unit the backend knows about.
    fn list_units(&self) -> BackendFuture<'_, Vec<UnitSummary>>;

    /// Diagnostics: details for one unit.
    fn inspect_unit<'a>(&'a self, id: &'a str) -> BackendFuture<'a, UnitDetail>;
}
