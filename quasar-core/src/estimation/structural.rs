//! Public-key structural risk: logical qubits and gates needed to run Shor's
//! algorithm against the key's hard problem.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{FormulaVersion, RiskThresholds, StructuralParams};
use crate::error::{EngineError, Result};

pub const MAX_BIT_LENGTH: u32 = 65_536;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyFamily {
    Rsa,
    FiniteFieldDh,
    Dsa,
    EllipticCurve,
}

impl KeyFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyFamily::Rsa => "rsa",
            KeyFamily::FiniteFieldDh => "dh",
            KeyFamily::Dsa => "dsa",
            KeyFamily::EllipticCurve => "ec",
        }
    }

    /// Short upper-case name used in finding titles.
    pub fn label(&self) -> &'static str {
        match self {
            KeyFamily::Rsa => "RSA",
            KeyFamily::FiniteFieldDh => "DH",
            KeyFamily::Dsa => "DSA",
            KeyFamily::EllipticCurve => "EC",
        }
    }
}

impl fmt::Display for KeyFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyFamily {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rsa" => Ok(KeyFamily::Rsa),
            "dh" | "ffdh" | "dhe" | "finite_field_dh" => Ok(KeyFamily::FiniteFieldDh),
            "dsa" => Ok(KeyFamily::Dsa),
            "ec" | "ecc" | "ecdsa" | "ecdh" | "ecdhe" | "elliptic_curve"
            | "id-ecpublickey" => Ok(KeyFamily::EllipticCurve),
            other => Err(EngineError::Validation(format!(
                "unknown key family `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    BrokenNow,
    AtRisk,
    Safe,
}

impl RiskTier {
    pub fn classify(qubits_needed: u64, thresholds: &RiskThresholds) -> Self {
        if qubits_needed < thresholds.broken_now_below {
            RiskTier::BrokenNow
        } else if qubits_needed < thresholds.at_risk_below {
            RiskTier::AtRisk
        } else {
            RiskTier::Safe
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::BrokenNow => "broken_now",
            RiskTier::AtRisk => "at_risk",
            RiskTier::Safe => "safe",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructuralEstimate {
    pub formula_version: FormulaVersion,
    pub family: KeyFamily,
    pub bit_length: u32,
    pub qubits_needed: u64,
    pub gate_count: f64,
    pub estimated_seconds: f64,
    pub tier: RiskTier,
}

/// Logical qubit count.
///
/// * v1, every family: `2b + overhead`.
/// * v2, RSA/DH/DSA: `2b + 3`.
/// * v2, elliptic curve: `9b + 2*ceil(log2 b) + 10`.
pub fn qubits_needed(
    family: KeyFamily,
    bit_length: u32,
    version: FormulaVersion,
    params: &StructuralParams,
) -> u64 {
    let b = u64::from(bit_length);
    match (version, family) {
        (FormulaVersion::V1, _) => 2 * b + params.overhead_qubits,
        (FormulaVersion::V2, KeyFamily::EllipticCurve) => {
            9 * b + 2 * ceil_log2(bit_length) + 10
        }
        (FormulaVersion::V2, _) => 2 * b + 3,
    }
}

/// Logical gate count `f(b)`.
///
/// * v1, every family, and v2 RSA/DH/DSA: `4b^3`.
/// * v2, elliptic curve: `448 b^3 log2 b + 4090 b^3`.
pub fn gate_count(family: KeyFamily, bit_length: u32, version: FormulaVersion) -> f64 {
    let b = f64::from(bit_length);
    let cube = b * b * b;
    match (version, family) {
        (FormulaVersion::V2, KeyFamily::EllipticCurve) => {
            448.0 * cube * b.log2() + 4090.0 * cube
        }
        _ => 4.0 * cube,
    }
}

fn ceil_log2(value: u32) -> u64 {
    if value <= 1 {
        0
    } else {
        u64::from(u32::BITS - (value - 1).leading_zeros())
    }
}

pub fn estimate_structural(
    family: KeyFamily,
    bit_length: u32,
    version: FormulaVersion,
    params: &StructuralParams,
    thresholds: &RiskThresholds,
    logical_gate_seconds: f64,
) -> Result<StructuralEstimate> {
    if bit_length == 0 || bit_length > MAX_BIT_LENGTH {
        return Err(EngineError::Computation(format!(
            "{family} key of {bit_length} bits is outside 1..={MAX_BIT_LENGTH}"
        )));
    }

    let qubits = qubits_needed(family, bit_length, version, params);
    let gates = gate_count(family, bit_length, version);
    Ok(StructuralEstimate {
        formula_version: version,
        family,
        bit_length,
        qubits_needed: qubits,
        gate_count: gates,
        estimated_seconds: gates * logical_gate_seconds,
        tier: RiskTier::classify(qubits, thresholds),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> RiskThresholds {
        RiskThresholds {
            broken_now_below: 2000,
            at_risk_below: 5000,
        }
    }

    #[test]
    fn rsa_2048_v1_with_overhead_100_is_at_risk() {
        let params = StructuralParams {
            overhead_qubits: 100,
        };
        let est = estimate_structural(
            KeyFamily::Rsa,
            2048,
            FormulaVersion::V1,
            &params,
            &thresholds(),
            1e-6,
        )
        .unwrap();
        assert_eq!(est.qubits_needed, 4196);
        assert_eq!(est.tier, RiskTier::AtRisk);
        assert_eq!(est.gate_count, 4.0 * 2048f64.powi(3));
    }

    #[test]
    fn v2_elliptic_curve_formula() {
        let params = StructuralParams::default();
        assert_eq!(
            qubits_needed(KeyFamily::EllipticCurve, 256, FormulaVersion::V2, &params),
            9 * 256 + 2 * 8 + 10
        );
        assert_eq!(ceil_log2(255), 8);
        assert_eq!(ceil_log2(256), 8);
        assert_eq!(ceil_log2(257), 9);
        let gates = gate_count(KeyFamily::EllipticCurve, 256, FormulaVersion::V2);
        let cube = 256f64.powi(3);
        assert_eq!(gates, 448.0 * cube * 8.0 + 4090.0 * cube);
    }

    #[test]
    fn repeated_invocation_is_identical() {
        let params = StructuralParams::default();
        let first = estimate_structural(
            KeyFamily::Dsa,
            3072,
            FormulaVersion::V2,
            &params,
            &thresholds(),
            1e-6,
        )
        .unwrap();
        for _ in 0..100 {
            let again = estimate_structural(
                KeyFamily::Dsa,
                3072,
                FormulaVersion::V2,
                &params,
                &thresholds(),
                1e-6,
            )
            .unwrap();
            assert_eq!(again, first);
        }
    }

    #[test]
    fn tier_boundaries_are_exclusive() {
        let t = thresholds();
        assert_eq!(RiskTier::classify(1999, &t), RiskTier::BrokenNow);
        assert_eq!(RiskTier::classify(2000, &t), RiskTier::AtRisk);
        assert_eq!(RiskTier::classify(5000, &t), RiskTier::Safe);
    }

    #[test]
    fn malformed_key_material_is_a_computation_error() {
        let params = StructuralParams::default();
        for bits in [0, MAX_BIT_LENGTH + 1] {
            let err = estimate_structural(
                KeyFamily::Rsa,
                bits,
                FormulaVersion::V1,
                &params,
                &thresholds(),
                1e-6,
            )
            .unwrap_err();
            assert!(matches!(err, EngineError::Computation(_)));
        }
    }

    #[test]
    fn family_aliases() {
        assert_eq!("ECDHE".parse::<KeyFamily>().unwrap(), KeyFamily::EllipticCurve);
        assert_eq!("ffdh".parse::<KeyFamily>().unwrap(), KeyFamily::FiniteFieldDh);
        assert!("kyber".parse::<KeyFamily>().is_err());
    }
}
