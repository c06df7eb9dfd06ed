//! Quantum backend abstraction.
//!
//! [`QuantumBackend`] is the uniform contract over the local simulator and
//! remote services. Backends are always used through a [`BackendPool`], which
//! enforces the declared `max_concurrent_jobs` with leases.

pub mod job;
pub mod pool;
pub mod remote;
pub mod simulator;

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use quasar_model::{
    BackendDescriptor, BackendId, CapabilityDescriptor, JobId, RequiredCapability,
};

use crate::error::{BackendError, EngineError, Result};

pub use job::{
    ConnectionHandle, JobHandle, JobResult, JobSpec, JobStatus, OracleDescriptor,
    OrderOutcome, ResourceBudget, SearchOutcome, SearchSpec, SearchStrategy,
    StructuralOutcome, StructuralRequest,
};
pub use pool::{BackendLease, BackendPool};
pub use remote::{RemoteBackend, RemoteConfig};
pub use simulator::{LocalSimulator, SimulatorConfig};

pub type BackendResult<T> = std::result::Result<T, BackendError>;

#[async_trait]
pub trait QuantumBackend: Send + Sync + fmt::Debug {
    /// Declared descriptor from configuration. Never contacts the backend.
    fn descriptor(&self) -> &BackendDescriptor;

    async fn connect(&self) -> BackendResult<ConnectionHandle>;

    /// Capability as reported by the live backend.
    async fn describe(&self, handle: &ConnectionHandle) -> BackendResult<CapabilityDescriptor>;

    /// Submits a job under the caller's `job_id`. Submitting the same id
    /// again must not start a second job.
    async fn submit(
        &self,
        handle: &ConnectionHandle,
        job_id: JobId,
        spec: JobSpec,
        budget: ResourceBudget,
    ) -> BackendResult<JobHandle>;

    async fn poll(&self, handle: &ConnectionHandle, job: &JobHandle) -> BackendResult<JobStatus>;

    /// Result of a completed job. A job that failed, even with partial data,
    /// yields [`BackendError::JobFailed`].
    async fn fetch_result(
        &self,
        handle: &ConnectionHandle,
        job: &JobHandle,
    ) -> BackendResult<JobResult>;

    /// Best effort. [`BackendError::Unsupported`] tells the caller to rely on
    /// its own timeout instead.
    async fn cancel(&self, handle: &ConnectionHandle, job: &JobHandle) -> BackendResult<()>;
}

/// Pools for every configured backend, keyed by id.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    pools: BTreeMap<BackendId, Arc<BackendPool>>,
    default_backend: Option<BackendId>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, backend: Arc<dyn QuantumBackend>) -> Result<Arc<BackendPool>> {
        let id = backend.descriptor().id.clone();
        if self.pools.contains_key(&id) {
            return Err(EngineError::Validation(format!(
                "backend `{id}` is already registered"
            )));
        }
        let pool = Arc::new(BackendPool::new(backend)?);
        self.pools.insert(id, pool.clone());
        Ok(pool)
    }

    pub fn set_default(&mut self, id: BackendId) -> Result<()> {
        if !self.pools.contains_key(&id) {
            return Err(EngineError::NotFound(format!("backend `{id}`")));
        }
        self.default_backend = Some(id);
        Ok(())
    }

    pub fn default_backend(&self) -> Option<&BackendId> {
        self.default_backend.as_ref()
    }

    pub fn get(&self, id: &BackendId) -> Result<Arc<BackendPool>> {
        self.pools
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("backend `{id}`")))
    }

    /// Picks the pool for a session. A requested id, then the default, wins
    /// outright. Otherwise the least loaded backend that satisfies
    /// `requirement` is chosen; when none does, the least loaded overall is
    /// returned so validation can report the gap.
    pub fn select(
        &self,
        requested: Option<&BackendId>,
        requirement: Option<&RequiredCapability>,
    ) -> Result<Arc<BackendPool>> {
        if let Some(id) = requested.or(self.default_backend.as_ref()) {
            return self.get(id);
        }
        let satisfies = |pool: &&Arc<BackendPool>| {
            requirement.is_none_or(|required| {
                pool.descriptor().capability.check(required).is_empty()
            })
        };
        self.pools
            .values()
            .filter(satisfies)
            .min_by(|a, b| by_load(a, b))
            .or_else(|| self.pools.values().min_by(|a, b| by_load(a, b)))
            .cloned()
            .ok_or_else(|| EngineError::Validation("no backends are registered".into()))
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &BackendDescriptor> {
        self.pools.values().map(|pool| pool.descriptor())
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

/// Orders pools by occupied share of their slots, then declared latency.
fn by_load(a: &BackendPool, b: &BackendPool) -> Ordering {
    let left = a.in_flight() * b.limit();
    let right = b.in_flight() * a.limit();
    left.cmp(&right).then_with(|| {
        let latency = |pool: &BackendPool| pool.descriptor().capability.average_latency_ms;
        latency(a).cmp(&latency(b))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simulator(id: &str, ceiling_bits: u32) -> Arc<dyn QuantumBackend> {
        Arc::new(
            LocalSimulator::new(SimulatorConfig {
                id: id.to_string(),
                simulation_ceiling_bits: ceiling_bits,
                ..SimulatorConfig::default()
            })
            .unwrap(),
        )
    }

    #[test]
    fn requested_and_default_backends_win() {
        let mut registry = BackendRegistry::new();
        registry.register(simulator("sim-a", 20)).unwrap();
        registry.register(simulator("sim-b", 20)).unwrap();
        assert_eq!(registry.default_backend(), None);

        let b = BackendId::new("sim-b").unwrap();
        let picked = registry.select(Some(&b), None).unwrap();
        assert_eq!(picked.descriptor().id, b);

        registry.set_default(b.clone()).unwrap();
        let picked = registry.select(None, Some(&RequiredCapability::qubits(64))).unwrap();
        assert_eq!(picked.descriptor().id, b);

        let missing = BackendId::new("sim-z").unwrap();
        assert!(matches!(
            registry.select(Some(&missing), None),
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unnamed_sessions_go_to_the_least_loaded_capable_backend() {
        let mut registry = BackendRegistry::new();
        let small = registry.register(simulator("sim-small", 8)).unwrap();
        let wide_a = registry.register(simulator("sim-wide-a", 20)).unwrap();
        registry.register(simulator("sim-wide-b", 20)).unwrap();

        let needs_16 = RequiredCapability::qubits(16);
        let picked = registry.select(None, Some(&needs_16)).unwrap();
        assert_eq!(picked.descriptor().id.as_str(), "sim-wide-a");

        let _busy = wide_a.lease(std::time::Duration::from_millis(50)).await.unwrap();
        let picked = registry.select(None, Some(&needs_16)).unwrap();
        assert_eq!(picked.descriptor().id.as_str(), "sim-wide-b");

        let _also_busy = small.lease(std::time::Duration::from_millis(50)).await.unwrap();
        let picked = registry.select(None, None).unwrap();
        assert_eq!(picked.descriptor().id.as_str(), "sim-wide-b");

        let nobody = RequiredCapability::qubits(64);
        let picked = registry.select(None, Some(&nobody)).unwrap();
        assert_eq!(picked.descriptor().id.as_str(), "sim-wide-b");
    }

    #[test]
    fn empty_registry_cannot_select() {
        assert!(BackendRegistry::new().select(None, None).is_err());
    }

    #[test]
    fn duplicate_backend_ids_are_rejected() {
        let mut registry = BackendRegistry::new();
        registry.register(simulator("sim", 20)).unwrap();
        assert!(registry.register(simulator("sim", 20)).is_err());
        assert_eq!(registry.len(), 1);
    }
}
