//! nimbus-ledger: per-node CPU/memory accounting.
//!
//! A [`ResourceLedger`] records which workload holds how much of a node's
//! capacity. `allocate` is the authoritative admission gate: it re-checks
//! capacity and records the reservation in one critical section, so two
//! concurrent provisions can never both claim the same marginal capacity.

pub mod ledger;

pub use ledger::ResourceLedger;
