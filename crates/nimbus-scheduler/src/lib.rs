//! nimbus-scheduler: places workloads across a fixed set of nodes.
//!
//! # Architecture
//!
//! ```text
//! ClusterScheduler
//!   ├── assignments: unit id → node id   (tokio Mutex)
//!   └── Node (one per configured node)
//!       ├── ResourceLedger
//!       └── LifecycleManager ──(expiration callback)──▶ assignments
//! ```
//!
//! Placement is best-fit: among nodes that can admit the request, the
//! one left with the least slack wins. Failures on the chosen node are
//! returned to the caller; no other node is tried.

pub mod error;
pub mod node;
pub mod scheduler;
pub mod scorer;

pub use error::{SchedulerError, SchedulerResult};
pub use node::{Node, NodeSummary};
pub use scheduler::ClusterScheduler;
