use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::ids::{FindingId, JobId, SessionId};

/// Finding severity, totally ordered from `Info` to `Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Info,
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quantum resources required to carry out an attack.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResourceEstimate {
    pub qubits: u64,
    pub gate_count: f64,
    pub estimated_seconds: f64,
}

/// Confidence in `[0.0, 1.0]`. Construction clamps out-of-range input and
/// maps NaN to zero.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Confidence(f64);

impl Confidence {
    pub const CERTAIN: Confidence = Confidence(1.0);
    pub const NONE: Confidence = Confidence(0.0);

    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Self::NONE;
        }
        Self(value.clamp(0.0, 1.0))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

/// Supporting data attached to a finding.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Evidence {
    /// Retries spent on backend submission before the job was accepted.
    pub retry_count: u32,
    /// Backend job that produced the data, if any.
    pub backend_job: Option<JobId>,
    /// Oracle queries or candidate keys tried by a real search.
    pub attempts: Option<u64>,
    pub details: BTreeMap<String, String>,
}

impl Evidence {
    pub fn with_detail(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.details.insert(key.into(), value.to_string());
        self
    }
}

/// A single immutable assessment result.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Finding {
    pub finding_id: FindingId,
    pub session_id: SessionId,
    pub severity: Severity,
    pub algorithm_name: String,
    pub formula_version: String,
    pub resource_estimate: ResourceEstimate,
    pub confidence: Confidence,
    pub evidence_ref: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub evidence: Evidence,
    pub sequence_number: u64,
    pub created_at: DateTime<Utc>,
}

/// Finding content before the session assigns identity and ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct FindingDraft {
    pub severity: Severity,
    pub algorithm_name: String,
    pub formula_version: String,
    pub resource_estimate: ResourceEstimate,
    pub confidence: Confidence,
    pub evidence_ref: String,
    pub evidence: Evidence,
}

impl FindingDraft {
    pub fn new(
        severity: Severity,
        algorithm_name: impl Into<String>,
        formula_version: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            algorithm_name: algorithm_name.into(),
            formula_version: formula_version.into(),
            resource_estimate: ResourceEstimate::default(),
            confidence: Confidence::CERTAIN,
            evidence_ref: String::new(),
            evidence: Evidence::default(),
        }
    }

    pub fn resources(mut self, estimate: ResourceEstimate) -> Self {
        self.resource_estimate = estimate;
        self
    }

    pub fn confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn evidence_ref(mut self, reference: impl Into<String>) -> Self {
        self.evidence_ref = reference.into();
        self
    }

    pub fn evidence(mut self, evidence: Evidence) -> Self {
        self.evidence = evidence;
        self
    }

    /// Seals the draft into a finding with the given identity.
    pub fn seal(self, session_id: SessionId, sequence_number: u64) -> Finding {
        Finding {
            finding_id: FindingId::new(),
            session_id,
            severity: self.severity,
            algorithm_name: self.algorithm_name,
            formula_version: self.formula_version,
            resource_estimate: self.resource_estimate,
            confidence: self.confidence,
            evidence_ref: self.evidence_ref,
            evidence: self.evidence,
            sequence_number,
            created_at: Utc::now(),
        }
    }
}
