use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use quasar_model::{ParamType, ParamValue, ParameterSchema};

use crate::error::{EngineError, Result, SchemaError};

/// Operator-supplied parameter strings, keyed by parameter name.
pub type RawParams = BTreeMap<String, String>;

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

/// Eager structural check run at registration.
pub fn validate_schema(schema: &ParameterSchema) -> std::result::Result<(), SchemaError> {
    let mut seen = HashSet::new();
    for spec in schema.iter() {
        if !valid_name(&spec.name) {
            return Err(SchemaError::InvalidName(spec.name.clone()));
        }
        if !seen.insert(spec.name.as_str()) {
            return Err(SchemaError::DuplicateParameter(spec.name.clone()));
        }
        if let Some(default) = &spec.default {
            if spec.required {
                return Err(SchemaError::RequiredWithDefault(spec.name.clone()));
            }
            if !default.is_compatible_with(spec.param_type) {
                return Err(SchemaError::IncompatibleDefault {
                    name: spec.name.clone(),
                    expected: spec.param_type.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Parameters after defaults were applied and every value was parsed into its
/// declared type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedParams {
    values: BTreeMap<String, ParamValue>,
}

impl ResolvedParams {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.values.iter()
    }

    fn missing(name: &str) -> EngineError {
        EngineError::Validation(format!("parameter `{name}` has no value"))
    }

    pub fn integer(&self, name: &str) -> Result<i64> {
        self.get(name)
            .and_then(ParamValue::as_i64)
            .ok_or_else(|| Self::missing(name))
    }

    pub fn opt_integer(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(ParamValue::as_i64)
    }

    /// Integer parameter constrained to `u32`.
    pub fn bits(&self, name: &str) -> Result<u32> {
        let value = self.integer(name)?;
        u32::try_from(value).map_err(|_| {
            EngineError::Validation(format!(
                "parameter `{name}` must be a non-negative bit count, got {value}"
            ))
        })
    }

    pub fn string(&self, name: &str) -> Result<&str> {
        self.get(name)
            .and_then(ParamValue::as_str)
            .ok_or_else(|| Self::missing(name))
    }

    pub fn flag(&self, name: &str) -> bool {
        self.get(name).and_then(ParamValue::as_bool).unwrap_or(false)
    }

    pub fn path(&self, name: &str) -> Result<PathBuf> {
        self.get(name)
            .and_then(ParamValue::as_path)
            .ok_or_else(|| Self::missing(name))
    }
}

/// Applies defaults, parses raw strings, and rejects unknown names and
/// missing required values.
pub fn resolve(schema: &ParameterSchema, raw: &RawParams) -> Result<ResolvedParams> {
    if let Some(unknown) = raw.keys().find(|name| schema.get(name).is_none()) {
        return Err(EngineError::Validation(format!(
            "unknown parameter `{unknown}`"
        )));
    }

    let mut values = BTreeMap::new();
    for spec in schema.iter() {
        let value = match raw.get(&spec.name) {
            Some(text) => ParamValue::parse(spec.param_type, text).map_err(|err| {
                EngineError::Validation(format!("parameter `{}`: {err}", spec.name))
            })?,
            None => match &spec.default {
                Some(default) => widen(default.clone(), spec.param_type),
                None if spec.required => {
                    return Err(EngineError::Validation(format!(
                        "missing required parameter `{}`",
                        spec.name
                    )));
                }
                None => continue,
            },
        };
        values.insert(spec.name.clone(), value);
    }
    Ok(ResolvedParams { values })
}

fn widen(value: ParamValue, param_type: ParamType) -> ParamValue {
    match (value, param_type) {
        (ParamValue::Integer(v), ParamType::Float) => ParamValue::Float(v as f64),
        (ParamValue::String(v), ParamType::Path) => ParamValue::Path(PathBuf::from(v)),
        (value, _) => value,
    }
}
