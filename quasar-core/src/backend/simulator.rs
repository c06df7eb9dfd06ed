//! Local simulator: a real-amplitude state-vector implementation of amplified
//! search, an exhaustive classical scan, and classical order finding, all
//! bounded by a configured simulation ceiling.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use quasar_model::{BackendDescriptor, BackendId, CapabilityDescriptor, Gate, JobId};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};

use super::{
    BackendResult, ConnectionHandle, JobHandle, JobResult, JobSpec, JobStatus,
    OracleDescriptor, OrderOutcome, QuantumBackend, ResourceBudget, SearchOutcome,
    SearchSpec, SearchStrategy, StructuralOutcome, StructuralRequest,
};
use crate::error::{BackendError, EngineError, Result};
use crate::estimation::StructuralParams;
use crate::estimation::search::optimal_iterations;
use crate::estimation::structural::{self, MAX_BIT_LENGTH};

/// Hard upper bound on the state vector: `2^26` amplitudes.
pub const MAX_SIMULATION_BITS: u32 = 26;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub id: String,
    /// Largest keyspace the simulator will search. The declared qubit count
    /// is this plus one oracle ancilla.
    pub simulation_ceiling_bits: u32,
    pub max_concurrent_jobs: usize,
    /// Amplification rounds (or candidates, when exhaustive) between
    /// cooperative yields.
    pub yield_every: u64,
    pub gate_set: BTreeSet<Gate>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            id: "local-simulator".to_string(),
            simulation_ceiling_bits: 20,
            max_concurrent_jobs: 4,
            yield_every: 16,
            gate_set: Gate::ALL.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone)]
enum SimJobState {
    Queued,
    Running,
    Done(JobResult),
    Failed(String),
    Cancelled,
    TimedOut,
}

impl SimJobState {
    fn is_finished(&self) -> bool {
        !matches!(self, SimJobState::Queued | SimJobState::Running)
    }
}

#[derive(Debug)]
struct SimJob {
    state: Arc<Mutex<SimJobState>>,
    cancel: CancellationToken,
}

impl SimJob {
    /// Finished jobs nobody will fetch: cancelled by the caller, or past
    /// their runtime budget.
    fn is_abandoned(&self) -> bool {
        let state = self.state.lock();
        state.is_finished()
            && (self.cancel.is_cancelled() || matches!(*state, SimJobState::TimedOut))
    }
}

#[derive(Debug)]
pub struct LocalSimulator {
    descriptor: BackendDescriptor,
    config: SimulatorConfig,
    jobs: DashMap<JobId, SimJob>,
}

impl LocalSimulator {
    pub fn new(config: SimulatorConfig) -> Result<Self> {
        if config.simulation_ceiling_bits == 0
            || config.simulation_ceiling_bits > MAX_SIMULATION_BITS
        {
            return Err(EngineError::Validation(format!(
                "simulation ceiling must be within 1..={MAX_SIMULATION_BITS} bits"
            )));
        }
        if config.max_concurrent_jobs == 0 {
            return Err(EngineError::Validation(
                "simulator max_concurrent_jobs must be at least 1".into(),
            ));
        }
        let descriptor = BackendDescriptor {
            id: BackendId::new(config.id.clone())?,
            is_simulated: true,
            capability: CapabilityDescriptor {
                max_qubits: config.simulation_ceiling_bits + 1,
                gate_set: config.gate_set.clone(),
                max_concurrent_jobs: config.max_concurrent_jobs,
                average_latency_ms: 0,
                supports_cancel: true,
            },
        };
        Ok(Self {
            descriptor,
            config,
            jobs: DashMap::new(),
        })
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Jobs currently tracked, finished or not.
    pub fn tracked_jobs(&self) -> usize {
        self.jobs.len()
    }

    /// Drops finished jobs that will never be fetched. Runs on every submit.
    fn sweep_abandoned(&self) {
        let before = self.jobs.len();
        self.jobs.retain(|_, job| !job.is_abandoned());
        let released = before.saturating_sub(self.jobs.len());
        if released > 0 {
            debug!(released, "released abandoned simulator jobs");
        }
    }

    fn check_spec(&self, spec: &JobSpec, budget: &ResourceBudget) -> BackendResult<()> {
        let ceiling = self.config.simulation_ceiling_bits;
        match spec {
            JobSpec::BoundedSearch(search) => {
                if search.keyspace_bits == 0 || search.keyspace_bits > ceiling {
                    return Err(BackendError::MalformedCircuit(format!(
                        "keyspace of {} bits exceeds simulation ceiling of {ceiling}",
                        search.keyspace_bits
                    )));
                }
                if search.oracle.marked >> search.keyspace_bits != 0 {
                    return Err(BackendError::MalformedCircuit(format!(
                        "marked key {} lies outside a {}-bit keyspace",
                        search.oracle.marked, search.keyspace_bits
                    )));
                }
            }
            JobSpec::StructuralEstimate(request) => {
                if request.bit_length == 0 || request.bit_length > MAX_BIT_LENGTH {
                    return Err(BackendError::MalformedCircuit(format!(
                        "bit length {} is out of range",
                        request.bit_length
                    )));
                }
            }
            JobSpec::OrderFinding { modulus, base } => {
                if *modulus < 3 || *modulus >> ceiling != 0 {
                    return Err(BackendError::MalformedCircuit(format!(
                        "modulus {modulus} must be within 3..2^{ceiling}"
                    )));
                }
                if *base < 2 || base >= modulus {
                    return Err(BackendError::MalformedCircuit(format!(
                        "base {base} must be within 2..{modulus}"
                    )));
                }
            }
        }
        let width = spec.qubits();
        if width > budget.max_qubits.min(self.descriptor.capability.max_qubits) {
            return Err(BackendError::MalformedCircuit(format!(
                "job needs {width} qubits, budget allows {}",
                budget.max_qubits
            )));
        }
        Ok(())
    }

    fn job(&self, job: &JobHandle) -> BackendResult<Arc<Mutex<SimJobState>>> {
        self.jobs
            .get(&job.job_id)
            .map(|entry| Arc::clone(&entry.state))
            .ok_or_else(|| BackendError::Rejected(format!("unknown job {}", job.job_id)))
    }
}

#[async_trait]
impl QuantumBackend for LocalSimulator {
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
        spec: JobSpec,
        budget: ResourceBudget,
    ) -> BackendResult<JobHandle> {
        if self.jobs.contains_key(&job_id) {
            debug!(%job_id, "job already submitted");
            return Ok(JobHandle::new(job_id, job_id.to_string()));
        }
        self.check_spec(&spec, &budget)?;
        self.sweep_abandoned();

        let state = Arc::new(Mutex::new(SimJobState::Queued));
        let cancel = CancellationToken::new();
        self.jobs.insert(
            job_id,
            SimJob {
                state: Arc::clone(&state),
                cancel: cancel.clone(),
            },
        );

        let yield_every = self.config.yield_every.max(1);
        let span = info_span!("sim_job", %job_id, kind = spec.label());
        tokio::spawn(
            async move {
                *state.lock() = SimJobState::Running;
                let work = execute(spec, yield_every, cancel.clone());
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => SimJobState::Cancelled,
                    result = tokio::time::timeout(budget.max_runtime, work) => match result {
                        Ok(Ok(result)) => SimJobState::Done(result),
                        Ok(Err(Interrupted::Cancelled)) => SimJobState::Cancelled,
                        Ok(Err(Interrupted::Failed(reason))) => SimJobState::Failed(reason),
                        Err(_) => SimJobState::TimedOut,
                    },
                };
                debug!(state = ?outcome, "simulator job finished");
                *state.lock() = outcome;
            }
            .instrument(span),
        );

        Ok(JobHandle::new(job_id, job_id.to_string()))
    }

    async fn poll(&self, _handle: &ConnectionHandle, job: &JobHandle) -> BackendResult<JobStatus> {
        let state = self.job(job)?;
        let status = match &*state.lock() {
            SimJobState::Queued => JobStatus::Queued,
            SimJobState::Running => JobStatus::Running,
            SimJobState::Done(_) => JobStatus::Completed,
            SimJobState::Failed(_) | SimJobState::Cancelled => JobStatus::Failed,
            SimJobState::TimedOut => JobStatus::TimedOut,
        };
        Ok(status)
    }

    async fn fetch_result(
        &self,
        _handle: &ConnectionHandle,
        job: &JobHandle,
    ) -> BackendResult<JobResult> {
        let state = self.job(job)?;
        let snapshot = state.lock().clone();
        let result = match snapshot {
            SimJobState::Queued | SimJobState::Running => {
                return Err(BackendError::Rejected(format!(
                    "job {} has not finished",
                    job.job_id
                )));
            }
            SimJobState::Done(result) => Ok(result),
            SimJobState::Failed(reason) => Err(BackendError::JobFailed(reason)),
            SimJobState::Cancelled => Err(BackendError::JobFailed("job was cancelled".into())),
            SimJobState::TimedOut => Err(BackendError::JobFailed(
                "job exceeded its runtime budget".into(),
            )),
        };
        self.jobs.remove(&job.job_id);
        result
    }

    async fn cancel(&self, _handle: &ConnectionHandle, job: &JobHandle) -> BackendResult<()> {
        if let Some(entry) = self.jobs.get(&job.job_id) {
            entry.cancel.cancel();
        }
        Ok(())
    }
}

#[derive(Debug)]
enum Interrupted {
    Cancelled,
    Failed(String),
}

async fn checkpoint(cancel: &CancellationToken) -> std::result::Result<(), Interrupted> {
    if cancel.is_cancelled() {
        return Err(Interrupted::Cancelled);
    }
    tokio::task::yield_now().await;
    Ok(())
}

async fn execute(
    spec: JobSpec,
    yield_every: u64,
    cancel: CancellationToken,
) -> std::result::Result<JobResult, Interrupted> {
    match spec {
        JobSpec::BoundedSearch(search) => {
            let outcome = match search.strategy {
                SearchStrategy::Amplified => {
                    amplified_search(&search, yield_every, &cancel).await?
                }
                SearchStrategy::Exhaustive => {
                    exhaustive_search(&search, yield_every, &cancel).await?
                }
            };
            Ok(JobResult::Search(outcome))
        }
        JobSpec::StructuralEstimate(request) => {
            Ok(JobResult::Structural(structural_outcome(&request)))
        }
        JobSpec::OrderFinding { modulus, base } => {
            Ok(JobResult::Order(find_order(modulus, base, yield_every, &cancel).await?))
        }
    }
}

fn measure(amplitudes: &[f64], oracle: &OracleDescriptor) -> (Option<u64>, f64) {
    let best = amplitudes
        .iter()
        .enumerate()
        .max_by(|a, b| (a.1 * a.1).total_cmp(&(b.1 * b.1)))
        .map(|(index, _)| index as u64);
    let marked = usize::try_from(oracle.marked).ok();
    let success = marked
        .and_then(|index| amplitudes.get(index))
        .map(|a| a * a)
        .unwrap_or(0.0);
    // The most probable outcome is checked against the oracle like a real
    // measurement would be.
    (best.filter(|candidate| oracle.accepts(*candidate)), success)
}

async fn amplified_search(
    spec: &SearchSpec,
    yield_every: u64,
    cancel: &CancellationToken,
) -> std::result::Result<SearchOutcome, Interrupted> {
    let size = 1usize << spec.keyspace_bits;
    let marked = usize::try_from(spec.oracle.marked)
        .ok()
        .filter(|index| *index < size)
        .ok_or_else(|| Interrupted::Failed("marked key outside keyspace".into()))?;

    let mut amplitudes = vec![1.0 / (size as f64).sqrt(); size];
    let rounds = optimal_iterations(spec.keyspace_bits);

    for round in 1..=rounds {
        amplitudes[marked] = -amplitudes[marked];
        let mean = amplitudes.iter().sum::<f64>() / size as f64;
        for amplitude in amplitudes.iter_mut() {
            *amplitude = 2.0 * mean - *amplitude;
        }
        if round % yield_every == 0 {
            checkpoint(cancel).await?;
        }
    }

    let (found, success_probability) = measure(&amplitudes, &spec.oracle);
    Ok(SearchOutcome {
        strategy: SearchStrategy::Amplified,
        keyspace_bits: spec.keyspace_bits,
        found,
        oracle_queries: rounds,
        success_probability,
    })
}

async fn exhaustive_search(
    spec: &SearchSpec,
    yield_every: u64,
    cancel: &CancellationToken,
) -> std::result::Result<SearchOutcome, Interrupted> {
    let size = 1u64 << spec.keyspace_bits;
    let mut queries = 0u64;
    let mut found = None;
    for candidate in 0..size {
        queries += 1;
        if spec.oracle.accepts(candidate) {
            found = Some(candidate);
            break;
        }
        if queries % yield_every == 0 {
            checkpoint(cancel).await?;
        }
    }
    Ok(SearchOutcome {
        strategy: SearchStrategy::Exhaustive,
        keyspace_bits: spec.keyspace_bits,
        found,
        oracle_queries: queries,
        success_probability: if found.is_some() { 1.0 } else { 0.0 },
    })
}

fn structural_outcome(request: &StructuralRequest) -> StructuralOutcome {
    let params = StructuralParams {
        overhead_qubits: request.overhead_qubits,
    };
    StructuralOutcome {
        qubits_needed: structural::qubits_needed(
            request.family,
            request.bit_length,
            request.formula_version,
            &params,
        ),
        gate_count: structural::gate_count(
            request.family,
            request.bit_length,
            request.formula_version,
        ),
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn mul_mod(a: u64, b: u64, modulus: u64) -> u64 {
    ((u128::from(a) * u128::from(b)) % u128::from(modulus)) as u64
}

fn pow_mod(mut base: u64, mut exponent: u64, modulus: u64) -> u64 {
    let mut result = 1 % modulus;
    base %= modulus;
    while exponent > 0 {
        if exponent & 1 == 1 {
            result = mul_mod(result, base, modulus);
        }
        base = mul_mod(base, base, modulus);
        exponent >>= 1;
    }
    result
}

/// Classical stand-in for the period-finding step of Shor's algorithm,
/// followed by the usual factor extraction.
async fn find_order(
    modulus: u64,
    base: u64,
    yield_every: u64,
    cancel: &CancellationToken,
) -> std::result::Result<OrderOutcome, Interrupted> {
    let shared = gcd(base, modulus);
    if shared != 1 {
        return Ok(OrderOutcome {
            modulus,
            base,
            order: None,
            factors: Some((shared, modulus / shared)),
        });
    }

    let mut value = base % modulus;
    let mut order = 1u64;
    while value != 1 {
        value = mul_mod(value, base, modulus);
        order += 1;
        if order > modulus {
            return Err(Interrupted::Failed(format!(
                "no order found for {base} mod {modulus}"
            )));
        }
        if order % yield_every == 0 {
            checkpoint(cancel).await?;
        }
    }

    let mut factors = None;
    if order % 2 == 0 {
        let half = pow_mod(base, order / 2, modulus);
        if half != modulus - 1 {
            let p = gcd(half.wrapping_sub(1), modulus);
            let q = gcd(half + 1, modulus);
            factors = [p, q]
                .into_iter()
                .find(|f| *f > 1 && *f < modulus)
                .map(|f| (f.min(modulus / f), f.max(modulus / f)));
        }
    }

    Ok(OrderOutcome {
        modulus,
        base,
        order: Some(order),
        factors,
    })
}
