#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use quasar_core::backend::{
    BackendRegistry, BackendResult, ConnectionHandle, JobHandle, JobResult, JobSpec,
    JobStatus, LocalSimulator, QuantumBackend, ResourceBudget, SimulatorConfig,
};
use quasar_core::error::CommandError;
use quasar_core::orchestration::PhaseTimeouts;
use quasar_core::ports::{CommandOutput, CommandPort, CommandRequest};
use quasar_core::{
    BackendError, InMemoryArchive, ModuleRegistry, Orchestrator, OrchestratorConfig,
    Ports, RetryConfig, SessionEvent, TargetCatalog,
};
use quasar_model::{
    BackendDescriptor, BackendId, CapabilityDescriptor, Gate, JobId, Protocol,
    SessionId, SessionState, Target, TargetDescriptor, TargetId,
};
use tokio_stream::{Stream, StreamExt};

/// Millisecond-scale timeouts and near-immediate retries.
pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        worker_pool_size: 4,
        queue_timeout_ms: 2_000,
        session_timeout_ms: 20_000,
        phase_timeouts: PhaseTimeouts {
            validating_ms: 2_000,
            queued_ms: 5_000,
            running_ms: 15_000,
        },
        cancel_timeout_ms: 500,
        poll_interval_ms: 5,
        retry: RetryConfig {
            max_retries: 3,
            backoff_base_ms: 5,
            backoff_max_ms: 50,
            jitter_ratio: 0.0,
            jitter_min_ms: 0,
        },
        default_backend: None,
        event_capacity: 1_024,
        retained_sessions: 64,
    }
}

pub fn simulator(id: &str, ceiling_bits: u32, max_concurrent_jobs: usize) -> Arc<LocalSimulator> {
    Arc::new(
        LocalSimulator::new(SimulatorConfig {
            id: id.to_string(),
            simulation_ceiling_bits: ceiling_bits,
            max_concurrent_jobs,
            ..SimulatorConfig::default()
        })
        .unwrap(),
    )
}

pub fn target(id: &str) -> Target {
    Target::new(
        TargetId::new(id).unwrap(),
        TargetDescriptor::new(format!("{id}.example.net"), 443, Protocol::Tls).unwrap(),
    )
}

pub fn target_id(id: &str) -> TargetId {
    TargetId::new(id).unwrap()
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub archive: Arc<InMemoryArchive>,
}

pub struct HarnessBuilder {
    registry: ModuleRegistry,
    backends: BackendRegistry,
    targets: Vec<Target>,
    ports: Ports,
    config: OrchestratorConfig,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            registry: ModuleRegistry::builtin().unwrap(),
            backends: BackendRegistry::new(),
            targets: vec![target("lab-host")],
            ports: Ports::default(),
            config: fast_config(),
        }
    }

    pub fn registry(mut self, registry: ModuleRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn backend(mut self, backend: Arc<dyn QuantumBackend>) -> Self {
        self.backends.register(backend).unwrap();
        self
    }

    pub fn target(mut self, target: Target) -> Self {
        self.targets.push(target);
        self
    }

    pub fn ports(mut self, ports: Ports) -> Self {
        self.ports = ports;
        self
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Harness {
        let catalog = Arc::new(TargetCatalog::new());
        for target in self.targets {
            catalog.admit(target).unwrap();
        }
        let archive = Arc::new(InMemoryArchive::new());
        let orchestrator = Orchestrator::new(
            Arc::new(self.registry),
            Arc::new(self.backends),
            catalog,
            archive.clone(),
            self.ports,
            self.config,
        )
        .unwrap();
        Harness {
            orchestrator,
            archive,
        }
    }
}

/// Collects every event of one session up to and including `Archived`.
pub async fn events_until_archived(
    events: impl Stream<Item = SessionEvent>,
    session_id: SessionId,
) -> Vec<SessionEvent> {
    let mut events = Box::pin(events);
    let mut seen = Vec::new();
    let deadline = Duration::from_secs(20);
    tokio::time::timeout(deadline, async {
        while let Some(event) = events.next().await {
            if event.session_id() != session_id {
                continue;
            }
            let archived = matches!(
                event,
                SessionEvent::StateChanged {
                    to: SessionState::Archived,
                    ..
                }
            );
            seen.push(event);
            if archived {
                break;
            }
        }
    })
    .await
    .expect("session never archived");
    seen
}

pub fn terminal_transitions(events: &[SessionEvent]) -> Vec<SessionState> {
    events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::StateChanged { to, .. } if to.is_terminal() => Some(*to),
            _ => None,
        })
        .collect()
}

/// How a [`StallingBackend`] misbehaves once a job is submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stall {
    /// Jobs stay `Running` until cancelled.
    Running,
    /// Polls never answer and cancel is refused.
    Unresponsive,
    /// Submit panics.
    Panic,
}

/// Backend whose jobs never finish. Counts cancel calls.
#[derive(Debug)]
pub struct StallingBackend {
    descriptor: BackendDescriptor,
    mode: Stall,
    pub cancels: AtomicUsize,
}

impl StallingBackend {
    pub fn new(id: &str) -> Arc<Self> {
        Self::with_mode(id, Stall::Running)
    }

    pub fn with_mode(id: &str, mode: Stall) -> Arc<Self> {
        Arc::new(Self {
            descriptor: BackendDescriptor {
                id: BackendId::new(id).unwrap(),
                is_simulated: true,
                capability: CapabilityDescriptor {
                    max_qubits: 32,
                    gate_set: Gate::ALL.into_iter().collect::<BTreeSet<_>>(),
                    max_concurrent_jobs: 2,
                    average_latency_ms: 0,
                    supports_cancel: true,
                },
            },
            mode,
            cancels: AtomicUsize::new(0),
        })
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuantumBackend for StallingBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    async fn connect(&self) -> BackendResult<ConnectionHandle> {
        Ok(ConnectionHandle::open(self.descriptor.id.clone()))
    }

    async fn describe(&self, _handle: &ConnectionHandle) -> BackendResult<CapabilityDescriptor> {
        Ok(self.descriptor.capability.clone())
    }

    async fn submit(
        &self,
        _handle: &ConnectionHandle,
        job_id: JobId,
        _spec: JobSpec,
        _budget: ResourceBudget,
    ) -> BackendResult<JobHandle> {
        if self.mode == Stall::Panic {
            panic!("backend driver crashed while submitting {job_id}");
        }
        Ok(JobHandle::new(job_id, format!("stall-{job_id}")))
    }

    async fn poll(&self, _handle: &ConnectionHandle, _job: &JobHandle) -> BackendResult<JobStatus> {
        if self.mode == Stall::Unresponsive {
            return std::future::pending().await;
        }
        if self.cancel_count() > 0 {
            Ok(JobStatus::Failed)
        } else {
            Ok(JobStatus::Running)
        }
    }

    async fn fetch_result(
        &self,
        _handle: &ConnectionHandle,
        _job: &JobHandle,
    ) -> BackendResult<JobResult> {
        Err(BackendError::JobFailed("cancelled".into()))
    }

    async fn cancel(&self, _handle: &ConnectionHandle, _job: &JobHandle) -> BackendResult<()> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        if self.mode == Stall::Unresponsive {
            return Err(BackendError::Unsupported("cancel is not confirmed".into()));
        }
        Ok(())
    }
}

/// Fake inspection tool: echoes a canned x509 dump for the requested key
/// size, or never answers when stdin is `hang`.
#[derive(Debug, Default)]
pub struct ScriptedInspector {
    pub calls: AtomicUsize,
}

#[async_trait]
impl CommandPort for ScriptedInspector {
    async fn run(&self, request: CommandRequest) -> Result<CommandOutput, CommandError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let input = request.stdin.unwrap_or_default();
        let input = String::from_utf8_lossy(&input).into_owned();
        match input.as_str() {
            "hang" => std::future::pending().await,
            "garbage" => Ok(CommandOutput {
                status: 0,
                stdout: "unable to load certificate".into(),
                stderr: String::new(),
            }),
            bits => Ok(CommandOutput {
                status: 0,
                stdout: format!(
                    "Certificate:\n    Subject Public Key Info:\n        \
                     Public Key Algorithm: rsaEncryption\n            \
                     Public-Key: ({bits} bit)\n"
                ),
                stderr: String::new(),
            }),
        }
    }
}
