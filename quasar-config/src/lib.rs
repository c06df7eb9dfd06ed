//! Settings loading and process setup for hosts embedding the Quasar engine.
//!
//! The core never reads files or the environment; this crate turns TOML/JSON
//! documents and environment variables into the typed configuration the core
//! consumes, builds backend pools from it, and installs a tracing subscriber.
#![allow(missing_docs)]

pub mod settings;
pub mod telemetry;

pub use settings::{BackendSettings, EngineSettings, RemoteSettings, SettingsSource};
pub use telemetry::init_tracing;
