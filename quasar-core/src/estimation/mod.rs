//! Cryptanalysis estimation engine.
//!
//! Every estimate is a pure function of its inputs, the injected
//! [`EstimationConfig`] and a pinned [`FormulaVersion`]. Nothing here
//! suspends or touches shared state.

pub mod catalog;
pub mod search;
pub mod structural;

use std::fmt;
use std::str::FromStr;

use quasar_model::{Confidence, Evidence, FindingDraft, ResourceEstimate, Severity};
use serde::{Deserialize, Serialize};

use crate::backend::simulator::MAX_SIMULATION_BITS;
use crate::error::{EngineError, Result};

pub use catalog::{AlgorithmKind, Assessment, CatalogEntry, QuantumThreat};
pub use search::SearchEstimate;
pub use structural::{KeyFamily, RiskTier, StructuralEstimate};

/// Pinned formula identifier recorded in every finding.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum FormulaVersion {
    #[default]
    V1,
    V2,
}

impl FormulaVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormulaVersion::V1 => "v1",
            FormulaVersion::V2 => "v2",
        }
    }
}

impl fmt::Display for FormulaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormulaVersion {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "v1" | "1" => Ok(FormulaVersion::V1),
            "v2" | "2" => Ok(FormulaVersion::V2),
            other => Err(EngineError::Validation(format!(
                "unknown formula version `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuralParams {
    /// Ancilla qubits added on top of `2b` by the v1 formula.
    pub overhead_qubits: u64,
}

impl Default for StructuralParams {
    fn default() -> Self {
        Self {
            overhead_qubits: 100,
        }
    }
}

/// Qubit thresholds for structural risk tiers. Strictly below
/// `broken_now_below` is `BrokenNow`, strictly below `at_risk_below` is
/// `AtRisk`, anything else is `Safe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskThresholds {
    pub broken_now_below: u64,
    pub at_risk_below: u64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            broken_now_below: 2_000,
            at_risk_below: 5_000,
        }
    }
}

/// Severity bands for symmetric primitives, keyed on effective security bits
/// after amplified search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymmetricPolicy {
    pub critical_below: f64,
    pub high_below: f64,
    pub medium_below: f64,
    pub low_below: f64,
}

impl Default for SymmetricPolicy {
    fn default() -> Self {
        Self {
            critical_below: 40.0,
            high_below: 64.0,
            medium_below: 112.0,
            low_below: 128.0,
        }
    }
}

impl SymmetricPolicy {
    pub fn severity(&self, effective_bits: f64) -> Severity {
        if effective_bits < self.critical_below {
            Severity::Critical
        } else if effective_bits < self.high_below {
            Severity::High
        } else if effective_bits < self.medium_below {
            Severity::Medium
        } else if effective_bits < self.low_below {
            Severity::Low
        } else {
            Severity::Info
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimationConfig {
    /// Largest keyspace (bits) for which a real bounded search is run.
    pub simulation_ceiling_bits: u32,
    /// Bits above the ceiling after which formula-only confidence halves.
    pub confidence_half_life_bits: f64,
    pub structural: StructuralParams,
    pub thresholds: RiskThresholds,
    /// Wall-clock cost of one logical gate, used for `estimated_seconds`.
    pub logical_gate_seconds: f64,
    pub symmetric: SymmetricPolicy,
    pub default_formula: FormulaVersion,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            simulation_ceiling_bits: 20,
            confidence_half_life_bits: 8.0,
            structural: StructuralParams::default(),
            thresholds: RiskThresholds::default(),
            logical_gate_seconds: 1e-6,
            symmetric: SymmetricPolicy::default(),
            default_formula: FormulaVersion::V1,
        }
    }
}

impl EstimationConfig {
    /// Rejects settings no backend or formula can honour.
    pub fn validate(&self) -> Result<()> {
        if self.simulation_ceiling_bits > MAX_SIMULATION_BITS {
            return Err(EngineError::Validation(format!(
                "simulation_ceiling_bits {} is above the {MAX_SIMULATION_BITS}-bit limit",
                self.simulation_ceiling_bits
            )));
        }
        let half_life = self.confidence_half_life_bits;
        if !(half_life.is_finite() && half_life > 0.0) {
            return Err(EngineError::Validation(
                "confidence_half_life_bits must be a positive number".into(),
            ));
        }
        if !(self.logical_gate_seconds.is_finite() && self.logical_gate_seconds >= 0.0) {
            return Err(EngineError::Validation(
                "logical_gate_seconds must be a non-negative number".into(),
            ));
        }
        if self.thresholds.broken_now_below > self.thresholds.at_risk_below {
            return Err(EngineError::Validation(format!(
                "broken_now_below ({}) exceeds at_risk_below ({})",
                self.thresholds.broken_now_below, self.thresholds.at_risk_below
            )));
        }
        Ok(())
    }
}

/// Configured front for the pure estimators. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct Estimator {
    config: EstimationConfig,
}

impl Estimator {
    pub fn new(config: EstimationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EstimationConfig {
        &self.config
    }

    pub fn search(
        &self,
        keyspace_bits: u32,
        version: FormulaVersion,
    ) -> Result<SearchEstimate> {
        self.search_with_ceiling(keyspace_bits, version, self.config.simulation_ceiling_bits)
    }

    /// Like [`Estimator::search`] with the ceiling lowered to what a specific
    /// backend can actually simulate. Never raises the configured ceiling.
    pub fn search_with_ceiling(
        &self,
        keyspace_bits: u32,
        version: FormulaVersion,
        ceiling_bits: u32,
    ) -> Result<SearchEstimate> {
        search::estimate_search(
            keyspace_bits,
            version,
            ceiling_bits.min(self.config.simulation_ceiling_bits),
            self.config.confidence_half_life_bits,
            self.config.logical_gate_seconds,
        )
    }

    pub fn structural(
        &self,
        family: KeyFamily,
        bit_length: u32,
        version: FormulaVersion,
    ) -> Result<StructuralEstimate> {
        structural::estimate_structural(
            family,
            bit_length,
            version,
            &self.config.structural,
            &self.config.thresholds,
            self.config.logical_gate_seconds,
        )
    }

    pub fn tier_severity(&self, tier: RiskTier) -> Severity {
        match tier {
            RiskTier::BrokenNow => Severity::Critical,
            RiskTier::AtRisk => Severity::High,
            RiskTier::Safe => Severity::Low,
        }
    }

    pub fn symmetric_severity(&self, effective_bits: f64) -> Severity {
        self.config.symmetric.severity(effective_bits)
    }

    pub fn search_draft(
        &self,
        algorithm_name: impl Into<String>,
        estimate: &SearchEstimate,
    ) -> FindingDraft {
        let evidence = Evidence::default()
            .with_detail("keyspace_bits", estimate.keyspace_bits)
            .with_detail("classical_equivalent", estimate.classical_equivalent)
            .with_detail("classical_log2", estimate.classical_log2)
            .with_detail("quantum_query_estimate", estimate.quantum_query_estimate)
            .with_detail("quantum_query_log2", estimate.quantum_query_log2)
            .with_detail("grover_iterations", estimate.grover_iterations)
            .with_detail("effective_security_bits", estimate.effective_security_bits);
        FindingDraft::new(
            self.symmetric_severity(estimate.effective_security_bits),
            algorithm_name,
            estimate.formula_version.as_str(),
        )
        .resources(estimate.resources)
        .confidence(estimate.confidence)
        .evidence_ref(format!("estimator:search:{}", estimate.formula_version))
        .evidence(evidence)
    }

    pub fn structural_draft(
        &self,
        algorithm_name: impl Into<String>,
        estimate: &StructuralEstimate,
    ) -> FindingDraft {
        let evidence = Evidence::default()
            .with_detail("family", estimate.family)
            .with_detail("bit_length", estimate.bit_length)
            .with_detail("risk_tier", estimate.tier.as_str());
        FindingDraft::new(
            self.tier_severity(estimate.tier),
            algorithm_name,
            estimate.formula_version.as_str(),
        )
        .resources(ResourceEstimate {
            qubits: estimate.qubits_needed,
            gate_count: estimate.gate_count,
            estimated_seconds: estimate.estimated_seconds,
        })
        .confidence(Confidence::CERTAIN)
        .evidence_ref(format!("estimator:structural:{}", estimate.formula_version))
        .evidence(evidence)
    }

    /// Scores a named algorithm from the catalog. Unknown names yield an
    /// Info finding marked as not assessed.
    pub fn assess_algorithm(
        &self,
        name: &str,
        version: FormulaVersion,
    ) -> Result<FindingDraft> {
        let Some(entry) = catalog::lookup(name) else {
            return Ok(FindingDraft::new(Severity::Info, name.trim(), version.as_str())
                .confidence(Confidence::NONE)
                .evidence_ref("catalog:unknown")
                .evidence(Evidence::default().with_detail("status", "not assessed")));
        };

        let draft = match entry.assessment {
            Assessment::Structural {
                family,
                typical_bits,
            } => {
                let estimate = self.structural(family, typical_bits, version)?;
                self.structural_draft(entry.name, &estimate)
            }
            Assessment::Search { keyspace_bits } => {
                let estimate = self.search(keyspace_bits, version)?;
                self.search_draft(entry.name, &estimate)
            }
            Assessment::Broken { severity } => {
                FindingDraft::new(severity, entry.name, version.as_str())
            }
        };

        let evidence = draft
            .evidence
            .clone()
            .with_detail("threat", format!("{:?}", entry.threat))
            .with_detail("kind", format!("{:?}", entry.kind))
            .with_detail("replacement", entry.replacement);
        Ok(draft
            .evidence_ref(format!("catalog:{}", entry.name))
            .evidence(evidence))
    }
}
