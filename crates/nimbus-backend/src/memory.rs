//! In-memory execution backend.
//!
//! Units are plain records; nothing is executed. Failures can be injected
//! per phase so callers can exercise their rollback paths.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use tracing::debug;

use crate::{
    BackendError, BackendFuture, BackendPhase, ExecutionBackend, UnitDetail, UnitSpec, UnitState,
    UnitSummary,
};

#[derive(Debug, Clone)]
struct Unit {
    spec: UnitSpec,
    state: UnitState,
}

#[derive(Debug, Default)]
struct Inner {
    units: HashMap<String, Unit>,
    images: HashSet<String>,
    failures: HashSet<BackendPhase>,
    next_id: u64,
}

/// Simulated backend with deterministic ids (`unit-1`, `unit-2`, ...).
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    inner: Mutex<Inner>,
    /// Artificial latency applied to every call.
    latency: Duration,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make every subsequent call in `phase` fail.
    pub fn fail_on(&self, phase: BackendPhase) {
        self.lock().failures.insert(phase);
    }

    /// Stop injecting failures for `phase`.
    pub fn clear_failure(&self, phase: BackendPhase) {
        self.lock().failures.remove(&phase);
    }

    /// Number of units currently known (any state).
    pub fn unit_count(&self) -> usize {
        self.lock().units.len()
    }

    /// State of a unit, if it exists.
    pub fn unit_state(&self, id: &str) -> Option<UnitState> {
        self.lock().units.get(id).map(|u| u.state)
    }

    /// Whether `image` has been materialized.
    pub fn has_image(&self, image: &str) -> bool {
        self.lock().images.contains(image)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn simulate(&self, phase: BackendPhase) -> Result<(), BackendError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.lock().failures.contains(&phase) {
            return Err(BackendError::new(phase, "injected failure"));
        }
        Ok(())
    }
}

fn missing(phase: BackendPhase, id: &str) -> BackendError {
    BackendError::new(phase, format!("no such unit: {id}"))
}

impl ExecutionBackend for InMemoryBackend {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn ensure_image<'a>(&'a self, image: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.simulate(BackendPhase::Image).await?;
            if image.trim().is_empty() {
                return Err(BackendError::new(BackendPhase::Image, "empty image reference"));
            }
            if self.lock().images.insert(image.to_string()) {
                debug!(%image, "image materialized");
            }
            Ok(())
        })
    }

    fn create_unit<'a>(&'a self, spec: &'a UnitSpec) -> BackendFuture<'a, String> {
        Box::pin(async move {
            self.simulate(BackendPhase::Create).await?;
            let mut inner = self.lock();
            if !inner.images.contains(&spec.image) {
                return Err(BackendError::new(
                    BackendPhase::Create,
                    format!("image not present: {}", spec.image),
                ));
            }
            if inner.units.values().any(|u| u.spec.name == spec.name) {
                return Err(BackendError::new(
                    BackendPhase::Create,
                    format!("name already in use: {}", spec.name),
                ));
            }
            inner.next_id += 1;
            let id = format!("unit-{}", inner.next_id);
            inner.units.insert(
                id.clone(),
                Unit {
                    spec: spec.clone(),
                    state: UnitState::Created,
                },
            );
            Ok(id)
        })
    }

    fn start_unit<'a>(&'a self, id: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.simulate(BackendPhase::Start).await?;
            let mut inner = self.lock();
            let unit = inner
                .units
                .get_mut(id)
                .ok_or_else(|| missing(BackendPhase::Start, id))?;
            unit.state = UnitState::Running;
            Ok(())
        })
    }

    fn stop_unit<'a>(&'a self, id: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.simulate(BackendPhase::Stop).await?;
            let mut inner = self.lock();
            let unit = inner
                .units
                .get_mut(id)
                .ok_or_else(|| missing(BackendPhase::Stop, id))?;
            unit.state = UnitState::Exited;
            Ok(())
        })
    }

    fn remove_unit<'a>(&'a self, id: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.simulate(BackendPhase::Remove).await?;
            self.lock()
                .units
                .remove(id)
                .map(|_| ())
                .ok_or_else(|| missing(BackendPhase::Remove, id))
        })
    }

    fn list_units(&self) -> BackendFuture<'_, Vec<UnitSummary>> {
        Box::pin(async move {
            self.simulate(BackendPhase::List).await?;
            let inner = self.lock();
            Ok(inner
                .units
                .iter()
                .map(|(id, u)| UnitSummary {
                    id: id.clone(),
                    name: u.spec.name.clone(),
                    image: u.spec.image.clone(),
                    state: u.state,
                })
                .collect())
        })
    }

    fn inspect_unit<'a>(&'a self, id: &'a str) -> BackendFuture<'a, UnitDetail> {
        Box::pin(async move {
            self.simulate(BackendPhase::Inspect).await?;
            let inner = self.lock();
            let unit = inner
                .units
                .get(id)
                .ok_or_else(|| missing(BackendPhase::Inspect, id))?;
            Ok(UnitDetail {
                id: id.to_string(),
                name: unit.spec.name.clone(),
                image: unit.spec.image.clone(),
                state: unit.state,
                cpu: unit.spec.cpu,
                memory_mb: unit.spec.memory_mb,
            })
        })
    }
}
