use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use quasar_model::{
    BackendId, FailureCause, Finding, FindingDraft, ModuleId,
    SNAPSHOT_SCHEMA_VERSION, SessionId, SessionSnapshot, SessionState,
    StateTransition, TargetId,
};

use crate::error::{EngineError, Result};

/// Mutable record of one session. Findings are append-only and numbered in
/// the order they are appended.
#[derive(Debug)]
pub struct SessionRecord {
    pub id: SessionId,
    pub target_ref: TargetId,
    pub module_id: ModuleId,
    pub backend_id: BackendId,
    state: SessionState,
    created_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    cause: Option<FailureCause>,
    transitions: Vec<StateTransition>,
    findings: Vec<Finding>,
    next_sequence: u64,
}

pub type SharedSession = Arc<Mutex<SessionRecord>>;

impl SessionRecord {
    pub fn new(
        id: SessionId,
        target_ref: TargetId,
        module_id: ModuleId,
        backend_id: BackendId,
    ) -> Self {
        Self {
            id,
            target_ref,
            module_id,
            backend_id,
            state: SessionState::Created,
            created_at: Utc::now(),
            ended_at: None,
            cause: None,
            transitions: Vec::new(),
            findings: Vec::new(),
            next_sequence: 1,
        }
    }

    pub fn shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn cause(&self) -> Option<&FailureCause> {
        self.cause.as_ref()
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    /// Applies a state change allowed by the session state machine.
    pub fn transition(&mut self, to: SessionState) -> Result<StateTransition> {
        if !self.state.can_transition_to(to) {
            return Err(EngineError::Internal(format!(
                "illegal session transition {} -> {}",
                self.state, to
            )));
        }
        let transition = StateTransition {
            from: self.state,
            to,
            at: Utc::now(),
        };
        if to.is_terminal() {
            self.ended_at = Some(transition.at);
        }
        self.state = to;
        self.transitions.push(transition.clone());
        Ok(transition)
    }

    /// Moves to a terminal state and records why.
    pub fn finish(
        &mut self,
        to: SessionState,
        cause: Option<FailureCause>,
    ) -> Result<StateTransition> {
        let transition = self.transition(to)?;
        self.cause = cause;
        Ok(transition)
    }

    /// Seals and appends a finding. Rejected once the session is terminal.
    pub fn append(&mut self, draft: FindingDraft) -> Result<Finding> {
        if self.state.is_terminal() || self.state == SessionState::Archived {
            return Err(EngineError::Internal(format!(
                "session {} is {} and no longer accepts findings",
                self.id, self.state
            )));
        }
        let finding = draft.seal(self.id, self.next_sequence);
        self.next_sequence += 1;
        self.findings.push(finding.clone());
        Ok(finding)
    }

    /// Persistence hand-off. `state` is the terminal outcome; callers take the
    /// snapshot before marking the record archived.
    pub fn snapshot(&self) -> SessionSnapshot {
        let state = match self.state {
            SessionState::Archived => self
                .transitions
                .iter()
                .rev()
                .map(|t| t.from)
                .find(SessionState::is_terminal)
                .unwrap_or(SessionState::Archived),
            other => other,
        };
        SessionSnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            session_id: self.id,
            target_ref: self.target_ref.clone(),
            module_id: self.module_id.clone(),
            backend_id: self.backend_id.clone(),
            state,
            cause: self.cause.clone(),
            started_at: self.created_at,
            ended_at: self.ended_at,
            transitions: self.transitions.clone(),
            findings: self.findings.clone(),
        }
    }
}
