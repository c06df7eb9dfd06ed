use quasar_model::{
    Gate, ModuleCategory, ModuleDescriptor, ModuleId, ModuleKind, ParamSpec,
    ParamType, ParamValue, ParameterSchema, RequiredCapability,
};

use crate::error::Result;

/// Supplies module descriptors at process start. The registry consumes a
/// read-only snapshot and performs no discovery of its own.
pub trait ManifestProvider {
    fn descriptors(&self) -> Result<Vec<ModuleDescriptor>>;
}

/// Fixed list of descriptors.
#[derive(Debug, Clone, Default)]
pub struct StaticManifest {
    descriptors: Vec<ModuleDescriptor>,
}

impl StaticManifest {
    pub fn new(descriptors: Vec<ModuleDescriptor>) -> Self {
        Self { descriptors }
    }
}

impl ManifestProvider for StaticManifest {
    fn descriptors(&self) -> Result<Vec<ModuleDescriptor>> {
        Ok(self.descriptors.clone())
    }
}

fn string(value: &str) -> Option<ParamValue> {
    Some(ParamValue::String(value.to_string()))
}

fn formula_param() -> ParamSpec {
    ParamSpec::optional(
        "formula_version",
        ParamType::String,
        string("v1"),
        "Pinned estimation formula (v1 or v2)",
    )
}

fn descriptor(
    id: &str,
    name: &str,
    description: &str,
    category: ModuleCategory,
    kind: ModuleKind,
    required_capability: RequiredCapability,
    params: Vec<ParamSpec>,
) -> Result<ModuleDescriptor> {
    Ok(ModuleDescriptor {
        id: ModuleId::new(id)?,
        name: name.to_string(),
        description: description.to_string(),
        category,
        kind,
        version: "1.0.0".to_string(),
        required_capability,
        parameter_schema: ParameterSchema::new(params),
    })
}

/// The five modules shipped with the engine.
pub fn builtin_manifest() -> Result<StaticManifest> {
    let descriptors = vec![
        descriptor(
            "exploit/grover_key_search",
            "Grover key search",
            "Amplified brute-force search against a symmetric keyspace",
            ModuleCategory::Exploit,
            ModuleKind::KeySearch,
            RequiredCapability::qubits(9).with_gates([
                Gate::H,
                Gate::X,
                Gate::Z,
                Gate::Cz,
                Gate::Measure,
            ]),
            vec![
                ParamSpec::required(
                    "keyspace_bits",
                    ParamType::Integer,
                    "Key length in bits",
                ),
                ParamSpec::optional(
                    "marked_key",
                    ParamType::Integer,
                    None,
                    "Key the oracle marks; drawn at random when absent",
                ),
                ParamSpec::optional(
                    "strategy",
                    ParamType::String,
                    string("amplified"),
                    "amplified or exhaustive",
                ),
                formula_param(),
            ],
        )?,
        descriptor(
            "auxiliary/structural_risk",
            "Structural risk scoring",
            "Shor resource estimate and risk tier for a public key",
            ModuleCategory::Auxiliary,
            ModuleKind::StructuralRisk,
            RequiredCapability::default(),
            vec![
                ParamSpec::required(
                    "family",
                    ParamType::String,
                    "rsa, dh, dsa or ec",
                ),
                ParamSpec::required(
                    "bit_length",
                    ParamType::Integer,
                    "Modulus or curve order size in bits",
                ),
                formula_param(),
                ParamSpec::optional(
                    "validate_on_backend",
                    ParamType::Bool,
                    Some(ParamValue::Bool(false)),
                    "Cross-check the estimate with a backend job",
                ),
            ],
        )?,
        descriptor(
            "payload/tls_session_decrypt",
            "TLS session decrypt assessment",
            "Harvest-now-decrypt-later exposure of a captured handshake",
            ModuleCategory::Payload,
            ModuleKind::TrafficDecrypt,
            RequiredCapability::default(),
            vec![
                ParamSpec::optional(
                    "key_exchange",
                    ParamType::String,
                    string("rsa"),
                    "Key exchange family of the captured session",
                ),
                ParamSpec::optional(
                    "key_exchange_bits",
                    ParamType::Integer,
                    Some(ParamValue::Integer(2048)),
                    "Key exchange modulus or curve size",
                ),
                ParamSpec::optional(
                    "cipher_bits",
                    ParamType::Integer,
                    Some(ParamValue::Integer(128)),
                    "Session cipher key length",
                ),
                formula_param(),
            ],
        )?,
        descriptor(
            "auxiliary/certificate_inspect",
            "Certificate inspection",
            "Extracts certificate key parameters with an external tool",
            ModuleCategory::Auxiliary,
            ModuleKind::CertificateInspection,
            RequiredCapability::default(),
            vec![
                ParamSpec::required(
                    "tool_path",
                    ParamType::Path,
                    "Absolute path of the inspection tool",
                ),
                ParamSpec::optional(
                    "tool_args",
                    ParamType::String,
                    string("x509 -noout -text"),
                    "Whitespace separated fixed arguments",
                ),
                ParamSpec::optional(
                    "timeout_ms",
                    ParamType::Integer,
                    Some(ParamValue::Integer(10_000)),
                    "Per-invocation timeout",
                ),
                formula_param(),
            ],
        )?,
        descriptor(
            "auxiliary/algorithm_survey",
            "Algorithm survey",
            "Quantum exposure of a list of named algorithms",
            ModuleCategory::Auxiliary,
            ModuleKind::AlgorithmSurvey,
            RequiredCapability::default(),
            vec![
                ParamSpec::required(
                    "algorithms",
                    ParamType::String,
                    "Comma separated algorithm names",
                ),
                formula_param(),
            ],
        )?,
    ];
    Ok(StaticManifest::new(descriptors))
}
