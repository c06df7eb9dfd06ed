use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use quasar_model::{BackendDescriptor, CapabilityDescriptor, JobId};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};
use uuid::Uuid;

use super::{
    BackendResult, ConnectionHandle, JobHandle, JobResult, JobSpec, JobStatus,
    QuantumBackend, ResourceBudget,
};
use crate::error::{BackendError, EngineError, Result};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct LeaseId(pub Uuid);

impl Default for LeaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaseId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shared pool for one backend. The semaphore is sized by the declared
/// `max_concurrent_jobs`, so outstanding leases can never exceed it.
pub struct BackendPool {
    backend: Arc<dyn QuantumBackend>,
    permits: Arc<Semaphore>,
    limit: usize,
    idle: Mutex<Vec<ConnectionHandle>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    connection_attempts: AtomicU64,
}

impl fmt::Debug for BackendPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendPool")
            .field("backend_id", &self.descriptor().id)
            .field("limit", &self.limit)
            .field("in_flight", &self.in_flight())
            .field("idle_connections", &self.idle.lock().len())
            .field("connection_attempts", &self.connection_attempts())
            .finish()
    }
}

impl BackendPool {
    pub fn new(backend: Arc<dyn QuantumBackend>) -> Result<Self> {
        let limit = backend.descriptor().capability.max_concurrent_jobs;
        if limit == 0 {
            return Err(EngineError::Validation(format!(
                "backend `{}` declares zero concurrent jobs",
                backend.descriptor().id
            )));
        }
        Ok(Self {
            backend,
            permits: Arc::new(Semaphore::new(limit)),
            limit,
            idle: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            connection_attempts: AtomicU64::new(0),
        })
    }

    pub fn descriptor(&self) -> &BackendDescriptor {
        self.backend.descriptor()
    }

    pub fn backend(&self) -> &Arc<dyn QuantumBackend> {
        &self.backend
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Acquire)
    }

    pub fn idle_connections(&self) -> usize {
        self.idle.lock().len()
    }

    /// Number of `connect` calls issued to the backend so far.
    pub fn connection_attempts(&self) -> u64 {
        self.connection_attempts.load(Ordering::Acquire)
    }

    /// Waits up to `timeout` for a free slot. Acquiring a lease does not
    /// contact the backend.
    pub async fn lease(self: &Arc<Self>, timeout: Duration) -> Result<BackendLease> {
        let permit = tokio::time::timeout(timeout, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| {
                EngineError::ResourceExhausted(format!(
                    "no lease on backend `{}` within {}ms",
                    self.descriptor().id,
                    timeout.as_millis()
                ))
            })?
            .map_err(|_| EngineError::Internal("backend pool closed".into()))?;

        let current = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::AcqRel);

        let lease = BackendLease {
            lease_id: LeaseId::new(),
            pool: Arc::clone(self),
            connection: Mutex::new(None),
            acquired_at: Utc::now(),
            _permit: permit,
        };
        debug!(
            backend_id = %self.descriptor().id,
            lease_id = %lease.lease_id,
            in_flight = current,
            limit = self.limit,
            "acquired backend lease"
        );
        Ok(lease)
    }

    fn checkout_idle(&self) -> Option<ConnectionHandle> {
        self.idle.lock().pop()
    }

    fn checkin(&self, handle: ConnectionHandle) {
        let mut idle = self.idle.lock();
        if idle.len() < self.limit {
            idle.push(handle);
        }
    }
}

/// A bounded claim on a pooled backend. Dropping it releases the slot and
/// returns a healthy connection to the pool.
pub struct BackendLease {
    pub lease_id: LeaseId,
    pool: Arc<BackendPool>,
    connection: Mutex<Option<ConnectionHandle>>,
    pub acquired_at: DateTime<Utc>,
    _permit: OwnedSemaphorePermit,
}

impl fmt::Debug for BackendLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendLease")
            .field("lease_id", &self.lease_id)
            .field("backend_id", &self.pool.descriptor().id)
            .field("connected", &self.is_connected())
            .field("acquired_at", &self.acquired_at)
            .finish()
    }
}

impl BackendLease {
    pub fn descriptor(&self) -> &BackendDescriptor {
        self.pool.descriptor()
    }

    pub fn pool(&self) -> &Arc<BackendPool> {
        &self.pool
    }

    pub fn is_connected(&self) -> bool {
        self.connection.lock().is_some()
    }

    /// Reuses an idle connection or opens a new one.
    pub async fn connect(&self) -> BackendResult<ConnectionHandle> {
        if let Some(handle) = self.connection.lock().clone() {
            return Ok(handle);
        }
        let handle = match self.pool.checkout_idle() {
            Some(handle) => {
                trace!(connection_id = %handle.connection_id, "reusing idle connection");
                handle
            }
            None => {
                self.pool.connection_attempts.fetch_add(1, Ordering::AcqRel);
                self.pool.backend.connect().await?
            }
        };
        *self.connection.lock() = Some(handle.clone());
        Ok(handle)
    }

    fn handle(&self) -> BackendResult<ConnectionHandle> {
        self.connection
            .lock()
            .clone()
            .ok_or_else(|| BackendError::Protocol("lease used before connect".into()))
    }

    /// Drops the current connection instead of returning it to the pool.
    pub fn discard_connection(&self) {
        if let Some(handle) = self.connection.lock().take() {
            debug!(connection_id = %handle.connection_id, "discarding backend connection");
        }
    }

    /// Discards the connection after errors that leave it unusable.
    fn observe<T>(&self, result: BackendResult<T>) -> BackendResult<T> {
        if let Err(err) = &result
            && err.poisons_connection()
        {
            debug!(
                backend_id = %self.pool.descriptor().id,
                error = %err,
                "backend error invalidates connection"
            );
            self.discard_connection();
        }
        result
    }

    pub async fn describe(&self) -> BackendResult<CapabilityDescriptor> {
        let handle = self.handle()?;
        self.observe(self.pool.backend.describe(&handle).await)
    }

    pub async fn submit(
        &self,
        job_id: JobId,
        spec: JobSpec,
        budget: ResourceBudget,
    ) -> BackendResult<JobHandle> {
        let handle = self.handle()?;
        self.observe(self.pool.backend.submit(&handle, job_id, spec, budget).await)
    }

    pub async fn poll(&self, job: &JobHandle) -> BackendResult<JobStatus> {
        let handle = self.handle()?;
        self.observe(self.pool.backend.poll(&handle, job).await)
    }

    pub async fn fetch_result(&self, job: &JobHandle) -> BackendResult<JobResult> {
        let handle = self.handle()?;
        self.observe(self.pool.backend.fetch_result(&handle, job).await)
    }

    pub async fn cancel(&self, job: &JobHandle) -> BackendResult<()> {
        let handle = self.handle()?;
        self.observe(self.pool.backend.cancel(&handle, job).await)
    }
}

impl Drop for BackendLease {
    fn drop(&mut self) {
        if let Some(handle) = self.connection.get_mut().take() {
            self.pool.checkin(handle);
        }
        let remaining = self.pool.in_flight.fetch_sub(1, Ordering::AcqRel) - 1;
        debug!(
            backend_id = %self.pool.descriptor().id,
            lease_id = %self.lease_id,
            in_flight = remaining,
            "released backend lease"
        );
    }
}
