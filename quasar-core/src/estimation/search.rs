//! Brute-force search cost: classical `2^k` against amplified `2^(k/2)`.

use std::f64::consts::FRAC_PI_4;

use quasar_model::{Confidence, ResourceEstimate};

use super::FormulaVersion;
use crate::error::{EngineError, Result};

/// Largest keyspace the estimator accepts.
pub const MAX_KEYSPACE_BITS: u32 = 4096;

/// Outcome of an amplified search estimate. Large magnitudes saturate at
/// `f64::MAX`; the `*_log2` fields stay exact.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchEstimate {
    pub formula_version: FormulaVersion,
    pub keyspace_bits: u32,
    pub classical_equivalent: f64,
    pub classical_log2: f64,
    pub quantum_query_estimate: f64,
    pub quantum_query_log2: f64,
    pub grover_iterations: f64,
    pub effective_security_bits: f64,
    pub resources: ResourceEstimate,
    pub confidence: Confidence,
    /// Whether a real bounded search is feasible at this size.
    pub within_simulation_ceiling: bool,
}

fn pow2(exponent: f64) -> f64 {
    2f64.powf(exponent).min(f64::MAX)
}

/// Optimal number of amplification rounds for `n` candidates with one
/// marked element.
pub fn optimal_iterations(keyspace_bits: u32) -> u64 {
    (FRAC_PI_4 * pow2(f64::from(keyspace_bits) / 2.0)).floor() as u64
}

/// Confidence for a formula-only estimate `bits` above the simulation
/// ceiling: halves every `half_life_bits`.
pub fn extrapolation_confidence(
    keyspace_bits: u32,
    ceiling_bits: u32,
    half_life_bits: f64,
) -> Confidence {
    if keyspace_bits <= ceiling_bits {
        return Confidence::CERTAIN;
    }
    if half_life_bits <= 0.0 {
        return Confidence::NONE;
    }
    let distance = f64::from(keyspace_bits - ceiling_bits);
    Confidence::new(0.5f64.powf(distance / half_life_bits))
}

/// Pure search estimate.
///
/// Both formula versions share the search model: `k + 1` qubits (key register
/// plus oracle ancilla) and `12k + 4` gates per amplification round.
pub fn estimate_search(
    keyspace_bits: u32,
    version: FormulaVersion,
    ceiling_bits: u32,
    half_life_bits: f64,
    logical_gate_seconds: f64,
) -> Result<SearchEstimate> {
    if keyspace_bits == 0 || keyspace_bits > MAX_KEYSPACE_BITS {
        return Err(EngineError::Computation(format!(
            "keyspace of {keyspace_bits} bits is outside 1..={MAX_KEYSPACE_BITS}"
        )));
    }

    let k = f64::from(keyspace_bits);
    let half = k / 2.0;
    let grover_iterations = (FRAC_PI_4 * pow2(half)).floor();
    let gates_per_round = 12.0 * k + 4.0;
    let gate_count = (grover_iterations * gates_per_round).min(f64::MAX);

    Ok(SearchEstimate {
        formula_version: version,
        keyspace_bits,
        classical_equivalent: pow2(k),
        classical_log2: k,
        quantum_query_estimate: pow2(half),
        quantum_query_log2: half,
        grover_iterations,
        effective_security_bits: half,
        resources: ResourceEstimate {
            qubits: u64::from(keyspace_bits) + 1,
            gate_count,
            estimated_seconds: (gate_count * logical_gate_seconds).min(f64::MAX),
        },
        confidence: extrapolation_confidence(
            keyspace_bits,
            ceiling_bits,
            half_life_bits,
        ),
        within_simulation_ceiling: keyspace_bits <= ceiling_bits,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sixteen_bit_keyspace() {
        let est = estimate_search(16, FormulaVersion::V1, 20, 8.0, 1e-6).unwrap();
        assert_eq!(est.classical_equivalent, 65_536.0);
        assert_eq!(est.quantum_query_estimate, 256.0);
        assert_eq!(est.grover_iterations, 201.0);
        assert_eq!(est.effective_security_bits, 8.0);
        assert_eq!(est.resources.qubits, 17);
        assert_eq!(est.confidence, Confidence::CERTAIN);
        assert!(est.within_simulation_ceiling);
    }

    #[test]
    fn confidence_decays_monotonically_above_ceiling() {
        let mut previous = 1.0;
        for bits in 21..=200 {
            let c = extrapolation_confidence(bits, 20, 8.0).value();
            assert!(c <= previous);
            assert!(c >= 0.0);
            previous = c;
        }
        assert_eq!(extrapolation_confidence(28, 20, 8.0).value(), 0.5);
    }

    #[test]
    fn huge_keyspaces_saturate_instead_of_overflowing() {
        let est = estimate_search(4096, FormulaVersion::V2, 20, 8.0, 1e-6).unwrap();
        assert!(est.classical_equivalent.is_finite());
        assert_eq!(est.classical_log2, 4096.0);
        assert!(est.resources.estimated_seconds.is_finite());
    }

    #[test]
    fn rejects_empty_and_oversize_keyspaces() {
        assert!(matches!(
            estimate_search(0, FormulaVersion::V1, 20, 8.0, 1e-6),
            Err(EngineError::Computation(_))
        ));
        assert!(estimate_search(4097, FormulaVersion::V1, 20, 8.0, 1e-6).is_err());
    }
}
