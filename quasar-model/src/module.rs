use std::fmt;
use std::path::PathBuf;

use crate::backend::RequiredCapability;
use crate::error::{ModelError, Result};
use crate::ids::ModuleId;

/// Broad module families, kept from the operator-facing taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ModuleCategory {
    Exploit,
    Payload,
    Auxiliary,
}

impl ModuleCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleCategory::Exploit => "exploit",
            ModuleCategory::Payload => "payload",
            ModuleCategory::Auxiliary => "auxiliary",
        }
    }
}

impl fmt::Display for ModuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Built-in assessment logic a descriptor binds to. The engine dispatches on
/// this tag; there is no dynamic loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ModuleKind {
    /// Symmetric-key brute force via amplified search.
    KeySearch,
    /// Public-key structural weakness scoring.
    StructuralRisk,
    /// Harvest-now-decrypt-later assessment of a captured handshake.
    TrafficDecrypt,
    /// Certificate key extraction through an external inspection tool.
    CertificateInspection,
    /// Catalog lookup for a list of named algorithms.
    AlgorithmSurvey,
}

/// Declared type of a module parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ParamType {
    String,
    Integer,
    Float,
    Bool,
    Path,
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Float => "float",
            ParamType::Bool => "bool",
            ParamType::Path => "path",
        };
        f.write_str(label)
    }
}

/// A typed parameter value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum ParamValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Path(PathBuf),
}

impl ParamValue {
    /// Parses an operator-supplied string into the declared type.
    pub fn parse(param_type: ParamType, raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let invalid = |what: &str| {
            ModelError::InvalidParameter(format!("`{raw}` is not a valid {what}"))
        };
        match param_type {
            ParamType::String => Ok(ParamValue::String(raw.to_string())),
            ParamType::Integer => raw
                .parse::<i64>()
                .map(ParamValue::Integer)
                .map_err(|_| invalid("integer")),
            ParamType::Float => raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(ParamValue::Float)
                .ok_or_else(|| invalid("float")),
            ParamType::Bool => match raw.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" | "on" => Ok(ParamValue::Bool(true)),
                "false" | "no" | "0" | "off" => Ok(ParamValue::Bool(false)),
                _ => Err(invalid("bool")),
            },
            ParamType::Path => {
                if raw.is_empty() {
                    Err(invalid("path"))
                } else {
                    Ok(ParamValue::Path(PathBuf::from(raw)))
                }
            }
        }
    }

    /// Whether this value can stand in for a parameter of `param_type`.
    /// Integers widen to floats; strings are accepted for paths.
    pub fn is_compatible_with(&self, param_type: ParamType) -> bool {
        matches!(
            (self, param_type),
            (ParamValue::Bool(_), ParamType::Bool)
                | (ParamValue::Integer(_), ParamType::Integer)
                | (ParamValue::Integer(_), ParamType::Float)
                | (ParamValue::Float(_), ParamType::Float)
                | (ParamValue::String(_), ParamType::String)
                | (ParamValue::String(_), ParamType::Path)
                | (ParamValue::Path(_), ParamType::Path)
        )
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<PathBuf> {
        match self {
            ParamValue::Path(p) => Some(p.clone()),
            ParamValue::String(s) => Some(PathBuf::from(s)),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Integer(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::String(v) => f.write_str(v),
            ParamValue::Path(v) => write!(f, "{}", v.display()),
        }
    }
}

/// Declaration of one module parameter.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ParamSpec {
    pub name: String,
    pub param_type: ParamType,
    #[cfg_attr(feature = "serde", serde(default))]
    pub required: bool,
    #[cfg_attr(feature = "serde", serde(default))]
    pub default: Option<ParamValue>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub description: String,
}

impl ParamSpec {
    pub fn required(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            required: true,
            default: None,
            description: description.to_string(),
        }
    }

    pub fn optional(
        name: &str,
        param_type: ParamType,
        default: Option<ParamValue>,
        description: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            required: false,
            default,
            description: description.to_string(),
        }
    }
}

/// Ordered parameter declarations for a module.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct ParameterSchema {
    pub params: Vec<ParamSpec>,
}

impl ParameterSchema {
    pub fn new(params: Vec<ParamSpec>) -> Self {
        Self { params }
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|spec| spec.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParamSpec> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// Registry entry describing an assessment module. Immutable once registered.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModuleDescriptor {
    pub id: ModuleId,
    pub name: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub description: String,
    pub category: ModuleCategory,
    pub kind: ModuleKind,
    pub version: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub required_capability: RequiredCapability,
    #[cfg_attr(feature = "serde", serde(default))]
    pub parameter_schema: ParameterSchema,
}
