//! Built-in assessment modules.
//!
//! Dispatch is a plain match over [`ModuleKind`]: the variant set is fixed at
//! compile time and selected by the descriptor loaded from the manifest.

mod certificate;
mod key_search;
mod structural;
mod survey;
mod traffic;

use quasar_model::{ModuleKind, Target};

use super::context::ModuleContext;
use crate::error::Result;
use crate::estimation::FormulaVersion;
use crate::registry::ResolvedParams;

pub use certificate::{PublicKeyInfo, parse_public_key};

/// Module-specific checks run during `Validating`, after the schema resolved
/// the parameters. Never touches a backend.
pub(crate) fn validate(kind: ModuleKind, params: &ResolvedParams, target: &Target) -> Result<()> {
    if let Some(raw) = params.get("formula_version").and_then(|v| v.as_str()) {
        raw.parse::<FormulaVersion>()?;
    }
    match kind {
        ModuleKind::KeySearch => key_search::validate(params),
        ModuleKind::StructuralRisk => structural::validate(params),
        ModuleKind::TrafficDecrypt => traffic::validate(params, target),
        ModuleKind::CertificateInspection => certificate::validate(params, target),
        ModuleKind::AlgorithmSurvey => survey::validate(params),
    }
}

pub(crate) async fn run(kind: ModuleKind, ctx: &ModuleContext) -> Result<()> {
    match kind {
        ModuleKind::KeySearch => key_search::run(ctx).await,
        ModuleKind::StructuralRisk => structural::run(ctx).await,
        ModuleKind::TrafficDecrypt => traffic::run(ctx).await,
        ModuleKind::CertificateInspection => certificate::run(ctx).await,
        ModuleKind::AlgorithmSurvey => survey::run(ctx).await,
    }
}
