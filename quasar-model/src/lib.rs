//! Core data model definitions shared across Quasar crates.
//!
//! Everything here is plain data: identifiers, module descriptors and their
//! parameter schemas, targets, backend capability descriptors, findings and
//! session snapshots. Enable the `serde` feature for (de)serialization.
#![allow(missing_docs)]

pub mod backend;
pub mod error;
pub mod finding;
pub mod ids;
pub mod module;
pub mod session;
pub mod target;

pub use backend::{
    BackendDescriptor, CapabilityDescriptor, CapabilityGap, Gate,
    RequiredCapability,
};
pub use error::{ModelError, Result as ModelResult};
pub use finding::{
    Confidence, Evidence, Finding, FindingDraft, ResourceEstimate, Severity,
};
pub use ids::{BackendId, FindingId, JobId, ModuleId, SessionId, TargetId};
pub use module::{
    ModuleCategory, ModuleDescriptor, ModuleKind, ParamSpec, ParamType,
    ParamValue, ParameterSchema,
};
pub use session::{
    FailureCause, FailureKind, SNAPSHOT_SCHEMA_VERSION, SessionSnapshot,
    SessionState, StateTransition,
};
pub use target::{Artifact, ArtifactKind, Protocol, Target, TargetDescriptor};
