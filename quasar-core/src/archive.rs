//! Persistence hand-off for finished sessions.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use parking_lot::RwLock;
use quasar_model::{SessionId, SessionSnapshot};
use tracing::debug;

use crate::error::{EngineError, Result};

/// Receives each session's snapshot exactly once, when it reaches a terminal
/// state.
#[async_trait]
pub trait SessionArchive: Send + Sync + fmt::Debug {
    async fn store(&self, snapshot: SessionSnapshot) -> Result<()>;
}

/// Keeps archived snapshots in memory. Useful for tests and for hosts that
/// read results back in-process.
#[derive(Debug, Default)]
pub struct InMemoryArchive {
    snapshots: RwLock<BTreeMap<SessionId, SessionSnapshot>>,
}

impl InMemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &SessionId) -> Option<SessionSnapshot> {
        self.snapshots.read().get(id).cloned()
    }

    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        self.snapshots.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.read().is_empty()
    }
}

#[async_trait]
impl SessionArchive for InMemoryArchive {
    async fn store(&self, snapshot: SessionSnapshot) -> Result<()> {
        let mut snapshots = self.snapshots.write();
        if snapshots.contains_key(&snapshot.session_id) {
            return Err(EngineError::Internal(format!(
                "session {} is already archived",
                snapshot.session_id
            )));
        }
        debug!(
            session_id = %snapshot.session_id,
            state = %snapshot.state,
            findings = snapshot.findings.len(),
            "session archived"
        );
        snapshots.insert(snapshot.session_id, snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use quasar_model::{
        BackendId, ModuleId, SNAPSHOT_SCHEMA_VERSION, SessionState, TargetId,
    };

    use super::*;

    fn snapshot() -> SessionSnapshot {
        SessionSnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            session_id: SessionId::new(),
            target_ref: TargetId::new("lab-host").unwrap(),
            module_id: ModuleId::new("auxiliary/algorithm_survey").unwrap(),
            backend_id: BackendId::new("local-simulator").unwrap(),
            state: SessionState::Completed,
            cause: None,
            started_at: Utc::now(),
            ended_at: Some(Utc::now()),
            transitions: Vec::new(),
            findings: Vec::new(),
        }
    }

    #[tokio::test]
    async fn snapshots_are_stored_once() {
        let archive = InMemoryArchive::new();
        let snapshot = snapshot();
        archive.store(snapshot.clone()).await.unwrap();
        assert!(archive.store(snapshot.clone()).await.is_err());
        assert_eq!(archive.get(&snapshot.session_id), Some(snapshot));
        assert_eq!(archive.len(), 1);
    }
}
