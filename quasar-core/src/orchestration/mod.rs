//! Execution orchestrator.
//!
//! Each session runs on its own task and walks the state machine
//! `Created → Validating → Queued → Running → terminal → Archived`.
//! Validation only looks at declared descriptors; the backend is first
//! contacted after a worker slot and a backend lease were acquired.

pub mod config;
pub mod context;
pub mod events;
mod modules;
pub mod retry;
pub mod session;
pub mod worker;

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use quasar_model::{
    BackendId, Confidence, Evidence, FailureCause, FailureKind, FindingDraft,
    ModuleDescriptor, ModuleId, SessionId, SessionSnapshot, SessionState,
    Severity, Target, TargetId,
};
use tokio::sync::watch;
use tokio::task::JoinError;
use tokio::time::Instant;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::archive::SessionArchive;
use crate::backend::{BackendLease, BackendPool, BackendRegistry};
use crate::error::{EngineError, Result};
use crate::estimation::Estimator;
use crate::ports::Ports;
use crate::registry::{ModuleRegistry, RawParams, ResolvedParams, resolve};
use crate::targets::TargetCatalog;

pub use config::{OrchestratorConfig, PhaseTimeouts, RetryConfig};
pub use context::{ExecutionContext, Interrupt, JobRun, ModuleContext};
pub use events::{EventBus, SessionEvent};
pub use modules::{PublicKeyInfo, parse_public_key};
pub use retry::{Retried, RetryPolicy, run_with_retry};
pub use session::{SessionRecord, SharedSession};
pub use worker::{WorkerPool, WorkerSlot};

/// Operator request to run one module against one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub target_id: TargetId,
    pub module_id: ModuleId,
    /// Falls back to the configured default backend.
    pub backend_id: Option<BackendId>,
    pub params: RawParams,
}

impl SessionRequest {
    pub fn new(target_id: TargetId, module_id: ModuleId) -> Self {
        Self {
            target_id,
            module_id,
            backend_id: None,
            params: BTreeMap::new(),
        }
    }

    pub fn backend(mut self, backend_id: BackendId) -> Self {
        self.backend_id = Some(backend_id);
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

#[derive(Debug)]
struct SessionEntry {
    record: SharedSession,
    cancel: CancellationToken,
    done: watch::Receiver<Option<SessionSnapshot>>,
}

/// Drives sessions concurrently, bounded by the worker pool.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<ModuleRegistry>,
    backends: Arc<BackendRegistry>,
    targets: Arc<TargetCatalog>,
    archive: Arc<dyn SessionArchive>,
    exec: Arc<ExecutionContext>,
    workers: WorkerPool,
    default_backend: Option<BackendId>,
    sessions: DashMap<SessionId, SessionEntry>,
    /// Finished sessions, oldest first.
    retired: Mutex<VecDeque<SessionId>>,
    shutdown: CancellationToken,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("modules", &self.inner.registry.len())
            .field("backends", &self.inner.backends.len())
            .field("targets", &self.inner.targets.len())
            .field("workers", &self.inner.workers)
            .field("sessions", &self.inner.sessions.len())
            .field("archive", &self.inner.archive)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ModuleRegistry>,
        backends: Arc<BackendRegistry>,
        targets: Arc<TargetCatalog>,
        archive: Arc<dyn SessionArchive>,
        ports: Ports,
        config: OrchestratorConfig,
    ) -> Result<Self> {
        Self::with_estimator(
            registry,
            backends,
            targets,
            archive,
            ports,
            config,
            Estimator::default(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_estimator(
        registry: Arc<ModuleRegistry>,
        backends: Arc<BackendRegistry>,
        targets: Arc<TargetCatalog>,
        archive: Arc<dyn SessionArchive>,
        ports: Ports,
        config: OrchestratorConfig,
        estimator: Estimator,
    ) -> Result<Self> {
        let workers = WorkerPool::new(config.worker_pool_size)?;
        let default_backend = match &config.default_backend {
            Some(raw) => {
                let id = BackendId::new(raw.as_str())?;
                backends.get(&id)?;
                Some(id)
            }
            None => None,
        };
        let exec = Arc::new(ExecutionContext::new(config, estimator, ports));
        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                backends,
                targets,
                archive,
                exec,
                workers,
                default_backend,
                sessions: DashMap::new(),
                retired: Mutex::new(VecDeque::new()),
                shutdown: CancellationToken::new(),
            }),
        })
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.inner.registry
    }

    pub fn backends(&self) -> &BackendRegistry {
        &self.inner.backends
    }

    pub fn targets(&self) -> &TargetCatalog {
        &self.inner.targets
    }

    pub fn workers(&self) -> &WorkerPool {
        &self.inner.workers
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.exec.events
    }

    /// Events for every session from now on.
    pub fn subscribe(&self) -> impl Stream<Item = SessionEvent> + Send + 'static {
        self.inner.exec.events.stream()
    }

    /// Starts a session and returns immediately. Progress is observable through
    /// [`Orchestrator::session_state`], [`Orchestrator::subscribe`] and
    /// [`Orchestrator::wait`].
    ///
    /// Fails only when no backend can be resolved for the request; every
    /// other problem ends the session in a terminal state with a cause.
    pub fn create_session(&self, request: SessionRequest) -> Result<SessionId> {
        let requested = request
            .backend_id
            .as_ref()
            .or(self.inner.default_backend.as_ref());
        // Unknown modules still get a backend; validation fails them later.
        let module = self.inner.registry.lookup(&request.module_id).ok();
        let requirement = module.as_ref().map(|module| &module.required_capability);
        let pool = self.inner.backends.select(requested, requirement)?;

        let id = SessionId::new();
        let record = SessionRecord::new(
            id,
            request.target_id.clone(),
            request.module_id.clone(),
            pool.descriptor().id.clone(),
        )
        .shared();
        let cancel = self.inner.shutdown.child_token();
        let (done_tx, done_rx) = watch::channel(None);
        self.inner.sessions.insert(
            id,
            SessionEntry {
                record: Arc::clone(&record),
                cancel: cancel.clone(),
                done: done_rx,
            },
        );

        info!(
            session_id = %id,
            module_id = %request.module_id,
            target_id = %request.target_id,
            backend_id = %pool.descriptor().id,
            "session created"
        );

        let span = info_span!(
            "session",
            session_id = %id,
            module_id = %request.module_id,
            backend_id = %pool.descriptor().id
        );
        let inner = Arc::clone(&self.inner);
        tokio::spawn(
            async move {
                let run = tokio::spawn(
                    Arc::clone(&inner)
                        .drive(Arc::clone(&record), cancel, request, pool)
                        .in_current_span(),
                );
                let snapshot = match run.await {
                    Ok(snapshot) => snapshot,
                    Err(err) => inner.abandon(&record, &err).await,
                };
                let _ = done_tx.send(Some(snapshot));
                inner.retire(id);
            }
            .instrument(span),
        );
        Ok(id)
    }

    /// Requests cooperative cancellation. Idempotent; a finished session is
    /// left as it is.
    pub fn cancel_session(&self, id: SessionId) -> Result<()> {
        let entry = self
            .inner
            .sessions
            .get(&id)
            .ok_or_else(|| EngineError::NotFound(format!("session {id}")))?;
        if !entry.cancel.is_cancelled() {
            info!(session_id = %id, "cancellation requested");
            entry.cancel.cancel();
        }
        Ok(())
    }

    pub fn session_state(&self, id: SessionId) -> Result<SessionState> {
        self.inner
            .sessions
            .get(&id)
            .map(|entry| entry.record.lock().state())
            .ok_or_else(|| EngineError::NotFound(format!("session {id}")))
    }

    /// Waits for the session to finish and returns its archived snapshot.
    pub async fn wait(&self, id: SessionId) -> Result<SessionSnapshot> {
        let mut done = self
            .inner
            .sessions
            .get(&id)
            .map(|entry| entry.done.clone())
            .ok_or_else(|| EngineError::NotFound(format!("session {id}")))?;
        let snapshot = done
            .wait_for(Option::is_some)
            .await
            .map_err(|_| EngineError::Internal(format!("session {id} ended without a snapshot")))?;
        snapshot
            .clone()
            .ok_or_else(|| EngineError::Internal(format!("session {id} has no snapshot")))
    }

    /// Drops a finished session from the live index. Its snapshot stays in
    /// the archive.
    pub fn forget(&self, id: SessionId) -> Result<()> {
        let removed = self
            .inner
            .sessions
            .remove_if(&id, |_, entry| entry.done.borrow().is_some());
        if removed.is_some() {
            self.inner.retired.lock().retain(|retired| *retired != id);
            debug!(session_id = %id, "session forgotten");
            return Ok(());
        }
        if self.inner.sessions.contains_key(&id) {
            return Err(EngineError::Validation(format!("session {id} is still running")));
        }
        Err(EngineError::NotFound(format!("session {id}")))
    }

    /// Sessions still addressable by id, running or finished.
    pub fn tracked_sessions(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Cancels every running session.
    pub fn shutdown(&self) {
        info!(sessions = self.inner.sessions.len(), "orchestrator shutting down");
        self.inner.shutdown.cancel();
    }
}

impl Inner {
    async fn drive(
        self: Arc<Self>,
        record: SharedSession,
        cancel: CancellationToken,
        request: SessionRequest,
        pool: Arc<BackendPool>,
    ) -> SessionSnapshot {
        let deadline = Instant::now() + self.exec.config.session_timeout();
        let interrupt = Interrupt::new(cancel, deadline, "session");

        let outcome = self.execute(&record, &interrupt, &request, &pool).await;
        let (state, cause) = match outcome {
            Ok(()) => (SessionState::Completed, None),
            Err(err) => {
                let state = match err.failure_kind() {
                    FailureKind::Cancellation => SessionState::Cancelled,
                    FailureKind::Timeout => SessionState::TimedOut,
                    _ => SessionState::Failed,
                };
                (state, Some(err.to_cause()))
            }
        };

        if let Err(err) = self.advance(&record, state, cause) {
            error!(error = %err, "could not record terminal state");
        }
        self.archive_snapshot(&record).await
    }

    async fn archive_snapshot(&self, record: &SharedSession) -> SessionSnapshot {
        let snapshot = record.lock().snapshot();
        match self.archive.store(snapshot.clone()).await {
            Ok(()) => {
                if let Err(err) = self.advance(record, SessionState::Archived, None) {
                    error!(error = %err, "could not mark session archived");
                }
            }
            Err(err) => error!(error = %err, "session archive rejected snapshot"),
        }
        snapshot
    }

    /// Settles a session whose task died before it reached a terminal state.
    async fn abandon(&self, record: &SharedSession, err: &JoinError) -> SessionSnapshot {
        let reason = if err.is_panic() {
            "session task panicked"
        } else {
            "session task was aborted"
        };
        error!(error = %err, "{reason}");

        let state = record.lock().state();
        if state == SessionState::Archived {
            return record.lock().snapshot();
        }
        if !state.is_terminal() {
            if state == SessionState::Created
                && let Err(err) = self.advance(record, SessionState::Validating, None)
            {
                error!(error = %err, "could not leave created state");
            }
            let cause = EngineError::Internal(reason.to_string()).to_cause();
            if let Err(err) = self.advance(record, SessionState::Failed, Some(cause)) {
                error!(error = %err, "could not record terminal state");
            }
        }
        self.archive_snapshot(record).await
    }

    /// Marks a session finished and evicts the oldest finished sessions
    /// beyond the retention limit.
    fn retire(&self, id: SessionId) {
        let evicted: Vec<SessionId> = {
            let mut retired = self.retired.lock();
            retired.push_back(id);
            let keep = self.exec.config.retained_sessions.max(1);
            let excess = retired.len().saturating_sub(keep);
            retired.drain(..excess).collect()
        };
        for old in evicted {
            if self.sessions.remove(&old).is_some() {
                debug!(session_id = %old, "evicted finished session");
            }
        }
    }

    async fn execute(
        &self,
        record: &SharedSession,
        interrupt: &Interrupt,
        request: &SessionRequest,
        pool: &Arc<BackendPool>,
    ) -> Result<()> {
        let phases = self.exec.config.phase_timeouts;

        self.advance(record, SessionState::Validating, None)?;
        let validating =
            interrupt.narrowed(Instant::now() + phases.validating(), "validating phase");
        validating.check()?;
        let (module, params, target) = self.validate(request, pool)?;
        validating.check()?;

        self.advance(record, SessionState::Queued, None)?;
        let queued = interrupt.narrowed(Instant::now() + phases.queued(), "queued phase");
        let (slot, lease) = tokio::select! {
            biased;
            err = queued.fired() => return Err(err),
            acquired = self.acquire(pool) => acquired?,
        };

        self.advance(record, SessionState::Running, None)?;
        let running = interrupt.narrowed(Instant::now() + phases.running(), "running phase");
        let session_id = record.lock().id;
        let ctx = ModuleContext::new(
            Arc::clone(&self.exec),
            Arc::clone(record),
            session_id,
            Arc::clone(&module),
            params,
            target,
            lease,
            running.clone(),
        );

        let result = self.run_module(&ctx, &running, &module).await;
        if let Err(err) = &result
            && err.failure_kind() == FailureKind::Computation
        {
            self.record_computation_failure(&ctx, err);
        }
        drop(ctx);
        drop(slot);
        result
    }

    fn validate(
        &self,
        request: &SessionRequest,
        pool: &BackendPool,
    ) -> Result<(Arc<ModuleDescriptor>, ResolvedParams, Arc<Target>)> {
        let module = self.registry.lookup(&request.module_id)?;
        let target = self.targets.get(&request.target_id)?;
        let params = resolve(&module.parameter_schema, &request.params)?;
        modules::validate(module.kind, &params, &target)?;

        let gaps = pool
            .descriptor()
            .capability
            .check(&module.required_capability);
        if !gaps.is_empty() {
            warn!(
                backend_id = %pool.descriptor().id,
                gaps = gaps.len(),
                "backend cannot satisfy module requirements"
            );
            return Err(EngineError::BackendCapability(gaps));
        }
        debug!("session validated");
        Ok((module, params, target))
    }

    /// One worker slot plus one backend lease, both within the queue timeout.
    async fn acquire(&self, pool: &Arc<BackendPool>) -> Result<(WorkerSlot, BackendLease)> {
        let queue_timeout = self.exec.config.queue_timeout();
        let started = Instant::now();
        let slot = self.workers.acquire(queue_timeout).await?;
        let remaining = queue_timeout.saturating_sub(started.elapsed());
        let lease = pool.lease(remaining).await?;
        Ok((slot, lease))
    }

    /// Runs the module. Once cancellation or a deadline fires the module gets
    /// the cancel timeout to wind down, after which it is dropped.
    async fn run_module(
        &self,
        ctx: &ModuleContext,
        interrupt: &Interrupt,
        module: &ModuleDescriptor,
    ) -> Result<()> {
        let work = modules::run(module.kind, ctx);
        tokio::pin!(work);
        tokio::select! {
            biased;
            result = &mut work => result,
            reason = interrupt.fired() => {
                let grace = self.exec.config.cancel_timeout();
                if tokio::time::timeout(grace, &mut work).await.is_err() {
                    warn!(
                        grace_ms = grace.as_millis() as u64,
                        "module did not wind down in time, abandoning it"
                    );
                }
                Err(reason)
            }
        }
    }

    fn record_computation_failure(&self, ctx: &ModuleContext, err: &EngineError) {
        let version = ctx
            .formula_version()
            .unwrap_or(self.exec.estimator.config().default_formula);
        let draft = FindingDraft::new(Severity::Info, ctx.module().name.clone(), version.as_str())
            .confidence(Confidence::NONE)
            .evidence_ref(format!("error:{}", ctx.module().id))
            .evidence(Evidence::default().with_detail("error", err));
        if let Err(record_err) = ctx.record(draft) {
            error!(error = %record_err, "could not record computation failure");
        }
    }

    fn advance(
        &self,
        record: &SharedSession,
        to: SessionState,
        cause: Option<FailureCause>,
    ) -> Result<()> {
        let mut session = record.lock();
        let transition = if to.is_terminal() {
            session.finish(to, cause.clone())?
        } else {
            session.transition(to)?
        };
        match &cause {
            Some(cause) => info!(
                from = %transition.from,
                to = %transition.to,
                cause = %cause,
                "session state changed"
            ),
            None => info!(from = %transition.from, to = %transition.to, "session state changed"),
        }
        self.exec.events.publish(SessionEvent::StateChanged {
            session_id: session.id,
            from: transition.from,
            to: transition.to,
            cause,
            at: transition.at,
        });
        Ok(())
    }
}
