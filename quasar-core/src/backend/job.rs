use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use quasar_model::{BackendId, JobId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::estimation::{FormulaVersion, KeyFamily};

/// Opaque connection to a backend, held by a lease between uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub connection_id: Uuid,
    pub backend_id: BackendId,
    pub opened_at: DateTime<Utc>,
}

impl ConnectionHandle {
    pub fn open(backend_id: BackendId) -> Self {
        Self {
            connection_id: Uuid::now_v7(),
            backend_id,
            opened_at: Utc::now(),
        }
    }
}

/// A submitted job. `external_id` is whatever the backend uses to address it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: JobId,
    pub external_id: String,
    pub submitted_at: DateTime<Utc>,
}

impl JobHandle {
    pub fn new(job_id: JobId, external_id: impl Into<String>) -> Self {
        Self {
            job_id,
            external_id: external_id.into(),
            submitted_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::TimedOut
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::TimedOut => "timed_out",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    #[default]
    Amplified,
    Exhaustive,
}

impl SearchStrategy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "amplified" | "grover" => Some(SearchStrategy::Amplified),
            "exhaustive" | "classical" => Some(SearchStrategy::Exhaustive),
            _ => None,
        }
    }
}

/// Describes which candidate the search oracle accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleDescriptor {
    pub marked: u64,
}

impl OracleDescriptor {
    pub fn accepts(&self, candidate: u64) -> bool {
        candidate == self.marked
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSpec {
    pub keyspace_bits: u32,
    pub oracle: OracleDescriptor,
    #[serde(default)]
    pub strategy: SearchStrategy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralRequest {
    pub family: KeyFamily,
    pub bit_length: u32,
    pub formula_version: FormulaVersion,
    pub overhead_qubits: u64,
}

/// Work a backend can be asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobSpec {
    BoundedSearch(SearchSpec),
    StructuralEstimate(StructuralRequest),
    /// Period finding for `base` modulo a small `modulus`.
    OrderFinding { modulus: u64, base: u64 },
}

impl JobSpec {
    /// Register width the job occupies on the device.
    pub fn qubits(&self) -> u32 {
        match self {
            JobSpec::BoundedSearch(spec) => spec.keyspace_bits.saturating_add(1),
            JobSpec::StructuralEstimate(_) => 0,
            JobSpec::OrderFinding { modulus, .. } => {
                let n = u64::BITS - modulus.leading_zeros();
                n.saturating_mul(3)
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobSpec::BoundedSearch(_) => "bounded_search",
            JobSpec::StructuralEstimate(_) => "structural_estimate",
            JobSpec::OrderFinding { .. } => "order_finding",
        }
    }
}

/// Limits the caller places on a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceBudget {
    pub max_qubits: u32,
    #[serde(with = "millis")]
    pub max_runtime: Duration,
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub strategy: SearchStrategy,
    pub keyspace_bits: u32,
    pub found: Option<u64>,
    /// Oracle queries made.
    pub oracle_queries: u64,
    /// Probability of measuring the marked state at the end of the run.
    pub success_probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralOutcome {
    pub qubits_needed: u64,
    pub gate_count: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderOutcome {
    pub modulus: u64,
    pub base: u64,
    pub order: Option<u64>,
    pub factors: Option<(u64, u64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobResult {
    Search(SearchOutcome),
    Structural(StructuralOutcome),
    Order(OrderOutcome),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_spec_wire_shape_is_tagged() {
        let spec = JobSpec::BoundedSearch(SearchSpec {
            keyspace_bits: 12,
            oracle: OracleDescriptor { marked: 7 },
            strategy: SearchStrategy::Amplified,
        });
        let json = serde_json::to_value(spec).unwrap();
        assert_eq!(json["type"], "bounded_search");
        assert_eq!(json["oracle"]["marked"], 7);
        assert_eq!(spec.qubits(), 13);
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::TimedOut.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }
}
