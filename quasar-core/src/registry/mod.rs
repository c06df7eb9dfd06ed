//! Module registry: an in-memory snapshot of module descriptors.

pub mod manifest;
pub mod schema;

use std::collections::BTreeMap;
use std::sync::Arc;

use quasar_model::{ModuleCategory, ModuleDescriptor, ModuleId, ModuleKind};
use tracing::debug;

use crate::error::{EngineError, Result};

pub use manifest::{ManifestProvider, StaticManifest, builtin_manifest};
pub use schema::{RawParams, ResolvedParams, resolve, validate_schema};

/// Criteria for [`ModuleRegistry::list`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ModuleFilter {
    pub category: Option<ModuleCategory>,
    pub kind: Option<ModuleKind>,
    /// Only modules whose qubit requirement fits within this many qubits.
    pub max_qubits: Option<u32>,
}

impl ModuleFilter {
    pub fn category(category: ModuleCategory) -> Self {
        Self {
            category: Some(category),
            ..Self::default()
        }
    }

    pub fn matches(&self, descriptor: &ModuleDescriptor) -> bool {
        self.category.is_none_or(|c| descriptor.category == c)
            && self.kind.is_none_or(|k| descriptor.kind == k)
            && self
                .max_qubits
                .is_none_or(|q| descriptor.required_capability.min_qubits <= q)
    }
}

#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<ModuleId, Arc<ModuleDescriptor>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every descriptor from `provider`, stopping at the first
    /// failure.
    pub fn from_manifest(provider: &dyn ManifestProvider) -> Result<Self> {
        let mut registry = Self::new();
        for descriptor in provider.descriptors()? {
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    /// Registry holding the built-in modules.
    pub fn builtin() -> Result<Self> {
        Self::from_manifest(&builtin_manifest()?)
    }

    /// Adds a descriptor after validating its schema. The registry is left
    /// untouched on failure.
    pub fn register(&mut self, descriptor: ModuleDescriptor) -> Result<()> {
        if self.modules.contains_key(&descriptor.id) {
            return Err(EngineError::DuplicateModuleId(descriptor.id));
        }
        validate_schema(&descriptor.parameter_schema).map_err(|source| {
            EngineError::Schema {
                module: descriptor.id.clone(),
                source,
            }
        })?;
        debug!(module_id = %descriptor.id, kind = ?descriptor.kind, "registered module");
        self.modules
            .insert(descriptor.id.clone(), Arc::new(descriptor));
        Ok(())
    }

    pub fn lookup(&self, id: &ModuleId) -> Result<Arc<ModuleDescriptor>> {
        self.modules
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("module `{id}`")))
    }

    /// Descriptors matching `filter`, in id order. Each call starts afresh.
    pub fn list<'a>(
        &'a self,
        filter: &'a ModuleFilter,
    ) -> impl Iterator<Item = &'a Arc<ModuleDescriptor>> + 'a {
        self.modules.values().filter(move |d| filter.matches(d))
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use quasar_model::{ParamSpec, ParamType, ParameterSchema, RequiredCapability};

    use super::*;

    fn module(id: &str) -> ModuleDescriptor {
        ModuleDescriptor {
            id: ModuleId::new(id).unwrap(),
            name: id.to_string(),
            description: String::new(),
            category: ModuleCategory::Auxiliary,
            kind: ModuleKind::AlgorithmSurvey,
            version: "1.0.0".into(),
            required_capability: RequiredCapability::qubits(20),
            parameter_schema: ParameterSchema::default(),
        }
    }

    #[test]
    fn duplicate_registration_leaves_registry_unchanged() {
        let mut registry = ModuleRegistry::new();
        registry.register(module("auxiliary/a")).unwrap();
        let before: Vec<_> = registry
            .list(&ModuleFilter::default())
            .map(|d| (**d).clone())
            .collect();

        let mut changed = module("auxiliary/a");
        changed.name = "replacement".into();
        let err = registry.register(changed).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateModuleId(_)));

        let after: Vec<_> = registry
            .list(&ModuleFilter::default())
            .map(|d| (**d).clone())
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn malformed_schema_is_rejected_eagerly() {
        let mut registry = ModuleRegistry::new();
        let mut bad = module("auxiliary/bad");
        bad.parameter_schema = ParameterSchema::new(vec![
            ParamSpec::required("x", ParamType::Integer, ""),
            ParamSpec::required("x", ParamType::Integer, ""),
        ]);
        assert!(matches!(
            registry.register(bad),
            Err(EngineError::Schema { .. })
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn lookup_missing_is_not_found() {
        let registry = ModuleRegistry::new();
        let id = ModuleId::new("exploit/none").unwrap();
        assert!(matches!(registry.lookup(&id), Err(EngineError::NotFound(_))));
    }

    #[test]
    fn builtin_manifest_registers_cleanly_and_lists_in_id_order() {
        let registry = ModuleRegistry::builtin().unwrap();
        assert_eq!(registry.len(), 5);

        let filter = ModuleFilter::default();
        let ids: Vec<_> = registry.list(&filter).map(|d| d.id.to_string()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);

        // restartable
        assert_eq!(registry.list(&filter).count(), 5);

        let exploits = ModuleFilter::category(ModuleCategory::Exploit);
        let found: Vec<_> = registry.list(&exploits).map(|d| d.id.as_str()).collect();
        assert_eq!(found, vec!["exploit/grover_key_search"]);

        let small = ModuleFilter {
            max_qubits: Some(4),
            ..ModuleFilter::default()
        };
        assert!(registry.list(&small).all(|d| d.kind != ModuleKind::KeySearch));
    }
}
