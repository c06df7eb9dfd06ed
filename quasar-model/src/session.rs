use std::fmt;

use chrono::{DateTime, Utc};

use crate::finding::Finding;
use crate::ids::{BackendId, ModuleId, SessionId, TargetId};

/// Version of the serialized [`SessionSnapshot`] layout.
pub const SNAPSHOT_SCHEMA_VERSION: u16 = 1;

/// Session lifecycle.
///
/// ```text
/// Created -> Validating -> Queued -> Running
///         -> {Completed, Failed, Cancelled, TimedOut} -> Archived
/// ```
///
/// `Validating` and `Queued` may also fail, time out, or be cancelled directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SessionState {
    Created,
    Validating,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
    Archived,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed
                | SessionState::Failed
                | SessionState::Cancelled
                | SessionState::TimedOut
        )
    }

    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Created, Validating) => true,
            (Created, Cancelled) => true,
            (Validating, Queued | Failed | Cancelled | TimedOut) => true,
            (Queued, Running | Failed | Cancelled | TimedOut) => true,
            (Running, Completed | Failed | Cancelled | TimedOut) => true,
            (Completed | Failed | Cancelled | TimedOut, Archived) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Validating => "validating",
            SessionState::Queued => "queued",
            SessionState::Running => "running",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
            SessionState::Cancelled => "cancelled",
            SessionState::TimedOut => "timed_out",
            SessionState::Archived => "archived",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error class recorded alongside a non-successful terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FailureKind {
    Validation,
    BackendCapability,
    BackendConnection,
    Computation,
    Timeout,
    Cancellation,
    ResourceExhausted,
    Internal,
}

/// Structured cause attached to every failed, cancelled or timed out session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FailureCause {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureCause {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// One recorded state change.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StateTransition {
    pub from: SessionState,
    pub to: SessionState,
    pub at: DateTime<Utc>,
}

/// Stable serializable hand-off to the persistence collaborator. `state` is
/// the terminal outcome the session reached before archival.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionSnapshot {
    pub schema_version: u16,
    pub session_id: SessionId,
    pub target_ref: TargetId,
    pub module_id: ModuleId,
    pub backend_id: BackendId,
    pub state: SessionState,
    pub cause: Option<FailureCause>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub transitions: Vec<StateTransition>,
    pub findings: Vec<Finding>,
}

impl SessionSnapshot {
    /// States visited in order, starting with `Created`.
    pub fn visited_states(&self) -> Vec<SessionState> {
        let mut states = vec![SessionState::Created];
        states.extend(self.transitions.iter().map(|t| t.to));
        states
    }
}

#[cfg(test)]
mod tests {
    use super::SessionState::*;

    #[test]
    fn validating_cannot_skip_to_running() {
        assert!(Validating.can_transition_to(Queued));
        assert!(Validating.can_transition_to(Failed));
        assert!(!Validating.can_transition_to(Running));
    }

    #[test]
    fn only_terminal_states_archive() {
        for state in [Completed, Failed, Cancelled, TimedOut] {
            assert!(state.is_terminal());
            assert!(state.can_transition_to(Archived));
        }
        assert!(!Running.can_transition_to(Archived));
        assert!(!Archived.can_transition_to(Running));
        assert!(!Archived.is_terminal());
    }
}
