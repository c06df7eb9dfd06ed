//! Targets admitted by the operator or a recon collaborator.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use quasar_model::{Target, TargetId};
use tracing::debug;

use crate::error::{EngineError, Result};

/// Read-mostly store of admitted targets. Artifacts are kept as opaque bytes.
#[derive(Debug, Default)]
pub struct TargetCatalog {
    targets: RwLock<BTreeMap<TargetId, Arc<Target>>>,
}

impl TargetCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates the network descriptor and stores the target. Ids are
    /// unique.
    pub fn admit(&self, target: Target) -> Result<Arc<Target>> {
        target.descriptor.validate()?;
        let mut targets = self.targets.write();
        if targets.contains_key(&target.id) {
            return Err(EngineError::Validation(format!(
                "target `{}` is already admitted",
                target.id
            )));
        }
        debug!(
            target_id = %target.id,
            host = %target.descriptor.host,
            port = target.descriptor.port,
            artifacts = target.artifacts.len(),
            "target admitted"
        );
        let target = Arc::new(target);
        targets.insert(target.id.clone(), Arc::clone(&target));
        Ok(target)
    }

    pub fn get(&self, id: &TargetId) -> Result<Arc<Target>> {
        self.targets
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("target `{id}`")))
    }

    pub fn len(&self) -> usize {
        self.targets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.read().is_empty()
    }
}
