//! nimbus-lifecycle: owns the workloads running on one node.
//!
//! # Architecture
//!
//! ```text
//! LifecycleManager
//!   ├── ResourceLedger (reserve before launch, release on failure/teardown)
//!   ├── ExecutionBackend (ensure image → create → start / stop → remove)
//!   ├── records: unit id → ContainerInfo   (tokio Mutex)
//!   └── Expiration sweep (background task)
//!       ├── collect expired ids under the lock
//!       ├── terminate each id without holding it
//!       └── Optional ExpirationCallback for the scheduler
//! ```
//!
//! Every provisioning failure after the reservation is made releases the
//! reservation before the error is returned. Termination releases only
//! after the backend has confirmed stop and remove.

pub mod error;
pub mod manager;
pub mod sweep;

pub use error::{LifecycleError, LifecycleResult};
pub use manager::LifecycleManager;
pub use sweep::{ExpirationCallback, ExpirationFuture};
