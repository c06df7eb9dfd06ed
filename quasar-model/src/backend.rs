use std::collections::BTreeSet;
use std::fmt;

use crate::ids::BackendId;

/// Logical gate families a backend may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Gate {
    H,
    X,
    Z,
    S,
    T,
    Rz,
    Cx,
    Cz,
    Ccx,
    Measure,
}

impl Gate {
    pub const ALL: [Gate; 10] = [
        Gate::H,
        Gate::X,
        Gate::Z,
        Gate::S,
        Gate::T,
        Gate::Rz,
        Gate::Cx,
        Gate::Cz,
        Gate::Ccx,
        Gate::Measure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Gate::H => "h",
            Gate::X => "x",
            Gate::Z => "z",
            Gate::S => "s",
            Gate::T => "t",
            Gate::Rz => "rz",
            Gate::Cx => "cx",
            Gate::Cz => "cz",
            Gate::Ccx => "ccx",
            Gate::Measure => "measure",
        }
    }
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimum backend features a module needs before a session may run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RequiredCapability {
    pub min_qubits: u32,
    pub gates: BTreeSet<Gate>,
}

impl RequiredCapability {
    pub fn qubits(min_qubits: u32) -> Self {
        Self {
            min_qubits,
            gates: BTreeSet::new(),
        }
    }

    pub fn with_gates(mut self, gates: impl IntoIterator<Item = Gate>) -> Self {
        self.gates.extend(gates);
        self
    }
}

/// Declared limits of a backend, used for pre-flight validation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CapabilityDescriptor {
    pub max_qubits: u32,
    pub gate_set: BTreeSet<Gate>,
    pub max_concurrent_jobs: usize,
    pub average_latency_ms: u64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub supports_cancel: bool,
}

/// A single unmet requirement reported by [`CapabilityDescriptor::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityGap {
    Qubits { required: u32, available: u32 },
    Gate(Gate),
}

impl fmt::Display for CapabilityGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityGap::Qubits {
                required,
                available,
            } => write!(
                f,
                "requires {required} qubits but backend offers {available}"
            ),
            CapabilityGap::Gate(gate) => {
                write!(f, "requires unsupported gate `{gate}`")
            }
        }
    }
}

impl CapabilityDescriptor {
    /// Lists every requirement this descriptor cannot satisfy. Empty means the
    /// module may run on the backend.
    pub fn check(&self, required: &RequiredCapability) -> Vec<CapabilityGap> {
        let mut gaps = Vec::new();
        if required.min_qubits > self.max_qubits {
            gaps.push(CapabilityGap::Qubits {
                required: required.min_qubits,
                available: self.max_qubits,
            });
        }
        gaps.extend(
            required
                .gates
                .iter()
                .filter(|gate| !self.gate_set.contains(gate))
                .map(|gate| CapabilityGap::Gate(*gate)),
        );
        gaps
    }

    pub fn satisfies(&self, required: &RequiredCapability) -> bool {
        self.check(required).is_empty()
    }
}

/// Static description of a configured backend.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BackendDescriptor {
    pub id: BackendId,
    pub is_simulated: bool,
    pub capability: CapabilityDescriptor,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(max_qubits: u32, gates: &[Gate]) -> CapabilityDescriptor {
        CapabilityDescriptor {
            max_qubits,
            gate_set: gates.iter().copied().collect(),
            max_concurrent_jobs: 1,
            average_latency_ms: 0,
            supports_cancel: true,
        }
    }

    #[test]
    fn check_reports_every_gap() {
        let caps = descriptor(15, &[Gate::H, Gate::X]);
        let required = RequiredCapability::qubits(20).with_gates([Gate::H, Gate::Ccx]);

        let gaps = caps.check(&required);
        assert_eq!(
            gaps,
            vec![
                CapabilityGap::Qubits {
                    required: 20,
                    available: 15
                },
                CapabilityGap::Gate(Gate::Ccx)
            ]
        );
        assert!(!caps.satisfies(&required));
    }

    #[test]
    fn equal_qubits_are_sufficient() {
        let caps = descriptor(20, &Gate::ALL);
        assert!(caps.satisfies(&RequiredCapability::qubits(20)));
    }
}
