//! nimbus-core: shared types for the Nimbus orchestration core.
//!
//! Everything here is plain data: resource quantities, provisioning
//! requests, workload records, the static topology config and the
//! duration-string parser used for TTLs and sweep intervals.

pub mod config;
pub mod duration;
pub mod types;

pub use config::{BackendConfig, BackendKind, NimbusConfig, NodeConfig, ServerConfig};
pub use duration::{DurationError, parse_duration};
pub use types::*;
