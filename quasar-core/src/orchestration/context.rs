//! Explicit context objects threaded through the orchestrator.
//!
//! [`ExecutionContext`] is shared by every session; [`ModuleContext`] is what a
//! module sees while it runs. Modules get randomness, hashing, commands and
//! backend access only through these.

use std::sync::Arc;
use std::time::Duration;

use quasar_model::{
    BackendDescriptor, Finding, FindingDraft, JobId, ModuleDescriptor, SessionId, Target,
};
use tokio::sync::OnceCell;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::OrchestratorConfig;
use super::events::{EventBus, SessionEvent};
use super::retry::{RetryPolicy, run_with_retry};
use super::session::SharedSession;
use crate::backend::{BackendLease, JobHandle, JobResult, JobSpec, JobStatus, ResourceBudget};
use crate::error::{BackendError, EngineError, Result};
use crate::estimation::{Estimator, FormulaVersion};
use crate::ports::Ports;
use crate::registry::ResolvedParams;

/// Cancellation flag plus the nearest deadline, checked cooperatively.
#[derive(Debug, Clone)]
pub struct Interrupt {
    token: CancellationToken,
    deadline: Instant,
    scope: &'static str,
}

impl Interrupt {
    pub fn new(token: CancellationToken, deadline: Instant, scope: &'static str) -> Self {
        Self {
            token,
            deadline,
            scope,
        }
    }

    /// Same token with a tighter deadline, if `deadline` is earlier.
    pub fn narrowed(&self, deadline: Instant, scope: &'static str) -> Self {
        if deadline < self.deadline {
            Self::new(self.token.clone(), deadline, scope)
        } else {
            self.clone()
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    fn timeout_error(&self) -> EngineError {
        EngineError::Timeout(format!("{} deadline exceeded", self.scope))
    }

    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            Err(EngineError::Cancelled)
        } else if Instant::now() >= self.deadline {
            Err(self.timeout_error())
        } else {
            Ok(())
        }
    }

    /// Resolves once cancellation is requested or the deadline passes.
    pub async fn fired(&self) -> EngineError {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => EngineError::Cancelled,
            _ = sleep_until(self.deadline) => self.timeout_error(),
        }
    }

    /// Sleeps for `duration` unless interrupted first.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            biased;
            err = self.fired() => Err(err),
            _ = sleep(duration) => Ok(()),
        }
    }
}

/// State shared by every session run by one orchestrator.
#[derive(Debug)]
pub struct ExecutionContext {
    pub config: OrchestratorConfig,
    pub estimator: Estimator,
    pub ports: Ports,
    pub events: EventBus,
    pub retry: RetryPolicy,
}

impl ExecutionContext {
    pub fn new(config: OrchestratorConfig, estimator: Estimator, ports: Ports) -> Self {
        let events = EventBus::new(config.event_capacity);
        let retry = RetryPolicy::new(config.retry);
        Self {
            config,
            estimator,
            ports,
            events,
            retry,
        }
    }
}

/// Outcome of one backend job driven to completion.
#[derive(Debug, Clone)]
pub struct JobRun {
    pub job: JobHandle,
    pub result: JobResult,
    /// Retries spent before the backend accepted the submission.
    pub retry_count: u32,
}

/// Everything a module needs while it runs.
pub struct ModuleContext {
    exec: Arc<ExecutionContext>,
    session: SharedSession,
    session_id: SessionId,
    module: Arc<ModuleDescriptor>,
    params: ResolvedParams,
    target: Arc<Target>,
    lease: BackendLease,
    interrupt: Interrupt,
    ready: OnceCell<()>,
}

impl std::fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext")
            .field("session_id", &self.session_id)
            .field("module_id", &self.module.id)
            .field("target_id", &self.target.id)
            .field("lease", &self.lease)
            .field("interrupt", &self.interrupt)
            .finish()
    }
}

impl ModuleContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        exec: Arc<ExecutionContext>,
        session: SharedSession,
        session_id: SessionId,
        module: Arc<ModuleDescriptor>,
        params: ResolvedParams,
        target: Arc<Target>,
        lease: BackendLease,
        interrupt: Interrupt,
    ) -> Self {
        Self {
            exec,
            session,
            session_id,
            module,
            params,
            target,
            lease,
            interrupt,
            ready: OnceCell::new(),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn module(&self) -> &ModuleDescriptor {
        &self.module
    }

    pub fn params(&self) -> &ResolvedParams {
        &self.params
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn estimator(&self) -> &Estimator {
        &self.exec.estimator
    }

    pub fn ports(&self) -> &Ports {
        &self.exec.ports
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    /// Declared descriptor of the leased backend.
    pub fn backend(&self) -> &BackendDescriptor {
        self.lease.descriptor()
    }

    /// Formula pinned by the `formula_version` parameter, or the configured
    /// default when the module has no such parameter.
    pub fn formula_version(&self) -> Result<FormulaVersion> {
        match self.params.get("formula_version").and_then(|v| v.as_str()) {
            Some(raw) => raw.parse(),
            None => Ok(self.exec.estimator.config().default_formula),
        }
    }

    /// Cooperative cancellation and deadline check.
    pub fn checkpoint(&self) -> Result<()> {
        self.interrupt.check()
    }

    /// Appends a finding to the session and announces it.
    pub fn record(&self, draft: FindingDraft) -> Result<Finding> {
        let mut session = self.session.lock();
        let finding = session.append(draft)?;
        debug!(
            session_id = %self.session_id,
            sequence_number = finding.sequence_number,
            severity = %finding.severity.as_str(),
            algorithm = %finding.algorithm_name,
            "finding recorded"
        );
        self.exec.events.publish(SessionEvent::FindingRecorded {
            session_id: self.session_id,
            finding_id: finding.finding_id,
            sequence_number: finding.sequence_number,
            severity: finding.severity,
            algorithm_name: finding.algorithm_name.clone(),
        });
        Ok(finding)
    }

    fn retry_notifier(
        &self,
        operation: &'static str,
    ) -> impl FnMut(u32, Duration, &BackendError) + '_ {
        move |attempt, delay, err| {
            self.exec.events.publish(SessionEvent::RetryScheduled {
                session_id: self.session_id,
                operation: operation.to_string(),
                attempt,
                delay_ms: delay.as_millis() as u64,
                error: err.to_string(),
            });
        }
    }

    /// Connects the lease on first use and re-checks the live capability
    /// against the module's requirement.
    async fn ensure_ready(&self) -> Result<()> {
        self.ready
            .get_or_try_init(|| self.open_backend())
            .await
            .map(|_| ())
    }

    async fn open_backend(&self) -> Result<()> {
        let lease = &self.lease;
        let connected = run_with_retry(
            &self.exec.retry,
            self.session_id,
            &self.interrupt,
            "connect",
            self.retry_notifier("connect"),
            move || lease.connect(),
        )
        .await?;
        debug!(
            session_id = %self.session_id,
            connection_id = %connected.value.connection_id,
            retries = connected.retries,
            "backend connection ready"
        );

        let live = run_with_retry(
            &self.exec.retry,
            self.session_id,
            &self.interrupt,
            "describe",
            self.retry_notifier("describe"),
            move || lease.describe(),
        )
        .await?
        .value;

        let gaps = live.check(&self.module.required_capability);
        if !gaps.is_empty() {
            warn!(
                session_id = %self.session_id,
                backend_id = %self.lease.descriptor().id,
                "live backend capability no longer satisfies module"
            );
            return Err(EngineError::BackendCapability(gaps));
        }
        Ok(())
    }

    /// Submits `spec` on the leased backend and polls it to a terminal
    /// status, honouring cancellation and deadlines at every poll.
    pub async fn run_job(&self, spec: JobSpec) -> Result<JobRun> {
        self.ensure_ready().await?;

        let lease = &self.lease;
        let budget = ResourceBudget {
            max_qubits: lease.descriptor().capability.max_qubits,
            max_runtime: self.interrupt.remaining(),
        };
        // One id for every attempt, so a retried submit cannot start a second job.
        let job_id = JobId::new();
        let submitted = run_with_retry(
            &self.exec.retry,
            self.session_id,
            &self.interrupt,
            "submit",
            self.retry_notifier("submit"),
            move || lease.submit(job_id, spec, budget),
        )
        .await?;
        let job = submitted.value;

        info!(
            session_id = %self.session_id,
            job_id = %job.job_id,
            external_id = %job.external_id,
            spec = spec.label(),
            retries = submitted.retries,
            "backend job submitted"
        );
        self.exec.events.publish(SessionEvent::JobSubmitted {
            session_id: self.session_id,
            job_id: job.job_id,
            external_id: job.external_id.clone(),
            spec: spec.label().to_string(),
        });

        let status = match self.await_terminal(&job).await {
            Ok(status) => status,
            Err(err) => {
                if matches!(err, EngineError::Cancelled | EngineError::Timeout(_)) {
                    self.abort_job(&job).await;
                }
                return Err(err);
            }
        };
        if status == JobStatus::TimedOut {
            return Err(EngineError::Timeout(format!(
                "backend job {} exceeded its runtime budget",
                job.job_id
            )));
        }

        let job_ref = &job;
        let result = run_with_retry(
            &self.exec.retry,
            self.session_id,
            &self.interrupt,
            "fetch_result",
            self.retry_notifier("fetch_result"),
            move || lease.fetch_result(job_ref),
        )
        .await?
        .value;

        debug!(
            session_id = %self.session_id,
            job_id = %job.job_id,
            %status,
            "backend job finished"
        );
        Ok(JobRun {
            job,
            result,
            retry_count: submitted.retries,
        })
    }

    async fn await_terminal(&self, job: &JobHandle) -> Result<JobStatus> {
        let lease = &self.lease;
        loop {
            self.interrupt.sleep(self.exec.config.poll_interval()).await?;
            let status = run_with_retry(
                &self.exec.retry,
                self.session_id,
                &self.interrupt,
                "poll",
                self.retry_notifier("poll"),
                move || lease.poll(job),
            )
            .await?
            .value;
            if status.is_terminal() {
                return Ok(status);
            }
        }
    }

    /// Best-effort backend cancel, waiting up to the cancel timeout for the
    /// job to reach a terminal status.
    async fn abort_job(&self, job: &JobHandle) {
        let grace = self.exec.config.cancel_timeout();
        let poll_interval = self.exec.config.poll_interval();
        let confirm = async {
            match self.lease.cancel(job).await {
                Ok(()) => loop {
                    match self.lease.poll(job).await {
                        Ok(status) if status.is_terminal() => return true,
                        Ok(_) => sleep(poll_interval).await,
                        Err(err) => {
                            debug!(job_id = %job.job_id, error = %err, "poll after cancel failed");
                            return false;
                        }
                    }
                },
                Err(BackendError::Unsupported(reason)) => {
                    debug!(
                        job_id = %job.job_id,
                        %reason,
                        "backend cannot cancel jobs, relying on local deadline"
                    );
                    false
                }
                Err(err) => {
                    warn!(job_id = %job.job_id, error = %err, "backend cancel failed");
                    false
                }
            }
        };

        match tokio::time::timeout(grace, confirm).await {
            Ok(true) => info!(
                session_id = %self.session_id,
                job_id = %job.job_id,
                "backend confirmed job cancellation"
            ),
            Ok(false) => {}
            Err(_) => warn!(
                session_id = %self.session_id,
                job_id = %job.job_id,
                grace_ms = grace.as_millis() as u64,
                "backend did not confirm cancellation in time"
            ),
        }
    }
}
