//! # Quasar Core
//!
//! Execution engine for quantum cryptanalysis assessments: it runs pluggable
//! assessment modules against declared targets on a local simulator or a
//! remote quantum service and turns the results into reproducible findings.
//!
//! ## Overview
//!
//! - **Module Registry**: validated catalog of module descriptors built from a
//!   manifest snapshot
//! - **Backends**: uniform job contract over the local simulator and remote
//!   HTTP services, pooled behind concurrency-bounded leases
//! - **Estimation**: pure, versioned formulas for amplified search cost and
//!   public-key structural risk
//! - **Orchestration**: session state machine with retries, deadlines and
//!   cooperative cancellation
//! - **Reports**: versioned documents built from archived sessions
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use quasar_core::{
//!     InMemoryArchive, ModuleRegistry, Orchestrator, OrchestratorConfig, Ports,
//!     Report, SessionRequest, TargetCatalog,
//!     backend::{BackendRegistry, LocalSimulator, SimulatorConfig},
//! };
//! use quasar_model::{ModuleId, Protocol, Target, TargetDescriptor, TargetId};
//!
//! async fn survey() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut backends = BackendRegistry::new();
//!     backends.register(Arc::new(LocalSimulator::new(SimulatorConfig::default())?))?;
//!
//!     let targets = Arc::new(TargetCatalog::new());
//!     let target_id = TargetId::new("vpn-gateway")?;
//!     targets.admit(Target::new(
//!         target_id.clone(),
//!         TargetDescriptor::new("vpn.example.net", 443, Protocol::Tls)?,
//!     ))?;
//!
//!     let orchestrator = Orchestrator::new(
//!         Arc::new(ModuleRegistry::builtin()?),
//!         Arc::new(backends),
//!         targets,
//!         Arc::new(InMemoryArchive::new()),
//!         Ports::default(),
//!         OrchestratorConfig::default(),
//!     )?;
//!
//!     let id = orchestrator.create_session(
//!         SessionRequest::new(target_id, ModuleId::new("auxiliary/algorithm_survey")?)
//!             .param("algorithms", "RSA, AES-128, SHA1"),
//!     )?;
//!     let snapshot = orchestrator.wait(id).await?;
//!     println!("{}", Report::from_snapshot(&snapshot).to_json()?);
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

/// Persistence hand-off for finished sessions
pub mod archive;

/// Quantum backend contract, pooling, simulator and remote adapter
pub mod backend;

/// Error types and error handling utilities
pub mod error;

/// Search and structural resource estimators
pub mod estimation;

/// Session orchestration
pub mod orchestration;

/// Randomness, hashing and command execution ports
pub mod ports;

/// Module registry and parameter schemas
pub mod registry;

/// Versioned report documents
pub mod report;

/// Admitted targets
pub mod targets;

pub use archive::{InMemoryArchive, SessionArchive};
pub use error::{BackendError, CommandError, EngineError, Result, SchemaError};
pub use estimation::{EstimationConfig, Estimator, FormulaVersion};
pub use orchestration::{
    Orchestrator, OrchestratorConfig, RetryConfig, SessionEvent, SessionRequest,
};
pub use ports::Ports;
pub use registry::{ModuleFilter, ModuleRegistry};
pub use report::Report;
pub use targets::TargetCatalog;
