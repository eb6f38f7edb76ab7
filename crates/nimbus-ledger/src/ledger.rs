//! Resource ledger for one node.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use nimbus_core::ResourceSpec;
use tracing::{debug, trace};

/// Reservations are held in whole millicores; cores are only used at the API.
fn to_millicores(cpu: f64) -> u64 {
    (cpu * 1000.0).round() as u64
}

fn from_millicores(millicores: u64) -> f64 {
    millicores as f64 / 1000.0
}

#[derive(Debug, Default)]
struct Reservations {
    /// workload id → reserved millicores.
    cpu: HashMap<String, u64>,
    /// workload id → reserved MB.
    memory: HashMap<String, u64>,
}

impl Reservations {
    fn cpu_sum(&self) -> u64 {
        self.cpu.values().sum()
    }

    fn memory_sum(&self) -> u64 {
        self.memory.values().sum()
    }

    fn fits(&self, total_millicores: u64, total_memory_mb: u64, spec: &ResourceSpec) -> bool {
        self.cpu_sum().saturating_add(to_millicores(spec.cpu)) <= total_millicores
            && self.memory_sum().saturating_add(spec.memory_mb) <= total_memory_mb
    }
}

/// Total vs. reserved CPU and memory for one node.
///
/// Invariant: the sum of reservations never exceeds the totals.
#[derive(Debug)]
pub struct ResourceLedger {
    total_cpu: f64,
    total_millicores: u64,
    total_memory_mb: u64,
    reservations: Mutex<Reservations>,
}

impl ResourceLedger {
    pub fn new(total_cpu: f64, total_memory_mb: u64) -> Self {
        Self {
            total_cpu,
            total_millicores: to_millicores(total_cpu),
            total_memory_mb,
            reservations: Mutex::new(Reservations::default()),
        }
    }

    /// Total capacity. Immutable for the ledger's lifetime.
    pub fn total(&self) -> ResourceSpec {
        ResourceSpec::new(self.total_cpu, self.total_memory_mb)
    }

    pub fn total_cpu(&self) -> f64 {
        self.total_cpu
    }

    pub fn total_memory_mb(&self) -> u64 {
        self.total_memory_mb
    }

    /// Whether `spec` would fit right now.
    ///
    /// Only a hint: capacity may be taken before the caller acts on it.
    /// [`allocate`](Self::allocate) re-checks.
    pub fn can_allocate(&self, spec: &ResourceSpec) -> bool {
        self.lock().fits(self.total_millicores, self.total_memory_mb, spec)
    }

    /// Reserve `spec` for `id` if it fits.
    ///
    /// Returns `false` without mutating anything when the capacity check
    /// fails or `id` already holds a reservation.
    pub fn allocate(&self, id: &str, spec: &ResourceSpec) -> bool {
        let mut reservations = self.lock();
        if reservations.cpu.contains_key(id) || reservations.memory.contains_key(id) {
            debug!(workload = %id, "reservation already held");
            return false;
        }
        if !reservations.fits(self.total_millicores, self.total_memory_mb, spec) {
            trace!(workload = %id, cpu = spec.cpu, memory_mb = spec.memory_mb, "reservation refused");
            return false;
        }
        reservations.cpu.insert(id.to_string(), to_millicores(spec.cpu));
        reservations.memory.insert(id.to_string(), spec.memory_mb);
        debug!(workload = %id, cpu = spec.cpu, memory_mb = spec.memory_mb, "resources reserved");
        true
    }

    /// Drop the reservation for `id`. Unknown ids are ignored.
    pub fn release(&self, id: &str) {
        let mut reservations = self.lock();
        let cpu = reservations.cpu.remove(id);
        let memory = reservations.memory.remove(id);
        if cpu.is_some() || memory.is_some() {
            debug!(workload = %id, "resources released");
        }
    }

    /// Aggregate reserved CPU and memory.
    pub fn usage(&self) -> ResourceSpec {
        let reservations = self.lock();
        ResourceSpec::new(
            from_millicores(reservations.cpu_sum()),
            reservations.memory_sum(),
        )
    }

    pub fn allocated_cpu_sum(&self) -> f64 {
        from_millicores(self.lock().cpu_sum())
    }

    pub fn allocated_memory_sum(&self) -> u64 {
        self.lock().memory_sum()
    }

    /// The reservation held by `id`, if any.
    pub fn reservation(&self, id: &str) -> Option<ResourceSpec> {
        let reservations = self.lock();
        let cpu = reservations.cpu.get(id)?;
        let memory = reservations.memory.get(id)?;
        Some(ResourceSpec::new(from_millicores(*cpu), *memory))
    }

    pub fn reservation_count(&self) -> usize {
        self.lock().cpu.len()
    }

    // A panic while holding the lock cannot leave the maps half-updated:
    // every mutation is a pair of single inserts/removes.
    fn lock(&self) -> MutexGuard<'_, Reservations> {
        self.reservations.lock().unwrap_or_else(|e| e.into_inner())
    }
}
