use std::time::Duration;

use quasar_model::{
    CapabilityGap, FailureCause, FailureKind, ModelError, ModuleId,
};
use thiserror::Error;

/// Failure reported by a quantum backend. Every variant is classified as
/// retryable or fatal; the orchestrator's retry policy keys off
/// [`BackendError::is_retryable`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("transient backend failure: {0}")]
    Transient(String),

    #[error("backend rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("backend request timed out: {0}")]
    Timeout(String),

    #[error("backend rejected credentials: {0}")]
    Authentication(String),

    #[error("malformed circuit or job specification: {0}")]
    MalformedCircuit(String),

    #[error("backend rejected request: {0}")]
    Rejected(String),

    #[error("operation not supported by backend: {0}")]
    Unsupported(String),

    #[error("backend job failed: {0}")]
    JobFailed(String),

    #[error("backend protocol error: {0}")]
    Protocol(String),
}

impl BackendError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackendError::Transient(_)
                | BackendError::RateLimited { .. }
                | BackendError::Timeout(_)
        )
    }

    /// Whether the connection that produced this error should not be reused.
    pub fn poisons_connection(&self) -> bool {
        matches!(
            self,
            BackendError::Authentication(_) | BackendError::Protocol(_)
        )
    }

    /// Server-provided delay hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            BackendError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Problems found while validating a module parameter schema.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("parameter `{0}` declared more than once")]
    DuplicateParameter(String),

    #[error("parameter name `{0}` is invalid")]
    InvalidName(String),

    #[error("default for `{name}` is not a valid {expected}")]
    IncompatibleDefault { name: String, expected: String },

    #[error("required parameter `{0}` must not declare a default")]
    RequiredWithDefault(String),
}

/// Failures of the command-execution port.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("executable must be an absolute path: {0}")]
    RelativePath(String),

    #[error("executable not found or not a regular file: {0}")]
    NotExecutable(String),

    #[error("argument contains a NUL byte")]
    NulByte,

    #[error("command timed out after {0:?}")]
    TimedOut(Duration),

    #[error("command exited with status {status}: {stderr}")]
    ExitStatus { status: i32, stderr: String },

    #[error("failed to spawn command: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("module `{0}` is already registered")]
    DuplicateModuleId(ModuleId),

    #[error("invalid parameter schema for `{module}`: {source}")]
    Schema {
        module: ModuleId,
        #[source]
        source: SchemaError,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("backend cannot satisfy module requirements: {}", format_gaps(.0))]
    BackendCapability(Vec<CapabilityGap>),

    #[error("backend connection failed after {attempts} attempt(s): {source}")]
    BackendConnection {
        attempts: u32,
        #[source]
        source: BackendError,
    },

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("computation error: {0}")]
    Computation(String),

    #[error("deadline exceeded: {0}")]
    Timeout(String),

    #[error("cancellation requested")]
    Cancelled,

    #[error("resources exhausted: {0}")]
    ResourceExhausted(String),

    #[error("command execution failed: {0}")]
    Command(#[from] CommandError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn format_gaps(gaps: &[CapabilityGap]) -> String {
    gaps.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<ModelError> for EngineError {
    fn from(err: ModelError) -> Self {
        EngineError::Validation(err.to_string())
    }
}

impl EngineError {
    /// Failure class recorded on the session when this error ends it.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            EngineError::Validation(_)
            | EngineError::NotFound(_)
            | EngineError::Schema { .. }
            | EngineError::DuplicateModuleId(_) => FailureKind::Validation,
            EngineError::BackendCapability(_) => FailureKind::BackendCapability,
            EngineError::Backend(
                BackendError::JobFailed(_) | BackendError::MalformedCircuit(_),
            )
            | EngineError::Computation(_)
            | EngineError::Command(_) => FailureKind::Computation,
            EngineError::BackendConnection { .. } | EngineError::Backend(_) => {
                FailureKind::BackendConnection
            }
            EngineError::Timeout(_) => FailureKind::Timeout,
            EngineError::Cancelled => FailureKind::Cancellation,
            EngineError::ResourceExhausted(_) => FailureKind::ResourceExhausted,
            EngineError::Io(_)
            | EngineError::Serialization(_)
            | EngineError::Internal(_) => FailureKind::Internal,
        }
    }

    pub fn to_cause(&self) -> FailureCause {
        FailureCause::new(self.failure_kind(), self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(BackendError::Transient("reset".into()).is_retryable());
        assert!(BackendError::RateLimited { retry_after: None }.is_retryable());
        assert!(BackendError::Timeout("read".into()).is_retryable());
        assert!(!BackendError::Authentication("bad token".into()).is_retryable());
        assert!(!BackendError::MalformedCircuit("bad oracle".into()).is_retryable());
        assert!(!BackendError::JobFailed("partial".into()).is_retryable());
    }

    #[test]
    fn failed_jobs_are_computation_failures() {
        let failed = EngineError::Backend(BackendError::JobFailed("partial".into()));
        assert_eq!(failed.failure_kind(), FailureKind::Computation);
        let auth = EngineError::Backend(BackendError::Authentication("401".into()));
        assert_eq!(auth.failure_kind(), FailureKind::BackendConnection);
        let exhausted = EngineError::BackendConnection {
            attempts: 4,
            source: BackendError::Transient("503".into()),
        };
        assert_eq!(exhausted.failure_kind(), FailureKind::BackendConnection);
    }

    #[test]
    fn capability_error_lists_gaps() {
        let err = EngineError::BackendCapability(vec![CapabilityGap::Qubits {
            required: 20,
            available: 15,
        }]);
        assert_eq!(err.failure_kind(), FailureKind::BackendCapability);
        assert!(err.to_string().contains("requires 20 qubits"));
    }
}
