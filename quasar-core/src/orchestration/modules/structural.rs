use quasar_model::{Confidence, Evidence};
use tracing::warn;

use crate::backend::{JobResult, JobSpec, StructuralRequest};
use crate::error::{EngineError, Result};
use crate::estimation::KeyFamily;
use crate::orchestration::context::ModuleContext;
use crate::registry::ResolvedParams;

/// Confidence kept when the backend disagrees with the local formula.
const DISPUTED_CONFIDENCE: f64 = 0.5;

fn family(params: &ResolvedParams) -> Result<KeyFamily> {
    params.string("family")?.parse()
}

pub(super) fn validate(params: &ResolvedParams) -> Result<()> {
    family(params)?;
    params.bits("bit_length")?;
    Ok(())
}

pub(super) async fn run(ctx: &ModuleContext) -> Result<()> {
    let family = family(ctx.params())?;
    let bit_length = ctx.params().bits("bit_length")?;
    let version = ctx.formula_version()?;

    let estimate = ctx.estimator().structural(family, bit_length, version)?;
    let mut draft = ctx
        .estimator()
        .structural_draft(format!("{}-{bit_length}", family.label()), &estimate);

    if ctx.params().flag("validate_on_backend") {
        let request = StructuralRequest {
            family,
            bit_length,
            formula_version: version,
            overhead_qubits: ctx.estimator().config().structural.overhead_qubits,
        };
        let run = ctx.run_job(JobSpec::StructuralEstimate(request)).await?;
        let JobResult::Structural(outcome) = run.result else {
            return Err(EngineError::Computation(
                "backend answered a structural job with a different result kind".into(),
            ));
        };

        let tolerance = f64::EPSILON * estimate.gate_count.abs().max(1.0);
        let agrees = outcome.qubits_needed == estimate.qubits_needed
            && (outcome.gate_count - estimate.gate_count).abs() <= tolerance;
        if !agrees {
            warn!(
                session_id = %ctx.session_id(),
                local_qubits = estimate.qubits_needed,
                backend_qubits = outcome.qubits_needed,
                "backend structural estimate disagrees with local formula"
            );
            draft = draft.confidence(Confidence::new(DISPUTED_CONFIDENCE));
        }

        let evidence = Evidence {
            retry_count: run.retry_count,
            backend_job: Some(run.job.job_id),
            ..draft.evidence.clone()
        }
        .with_detail("backend_validated", agrees)
        .with_detail("backend_qubits", outcome.qubits_needed);
        draft = draft.evidence(evidence);
    }

    ctx.record(draft)?;
    Ok(())
}
