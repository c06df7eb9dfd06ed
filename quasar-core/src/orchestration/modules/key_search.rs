use quasar_model::Evidence;
use tracing::debug;

use crate::backend::{JobResult, JobSpec, OracleDescriptor, SearchSpec, SearchStrategy};
use crate::error::{EngineError, Result};
use crate::orchestration::context::ModuleContext;
use crate::registry::ResolvedParams;

fn strategy(params: &ResolvedParams) -> Result<SearchStrategy> {
    let raw = params.string("strategy")?;
    SearchStrategy::parse(raw)
        .ok_or_else(|| EngineError::Validation(format!("unknown search strategy `{raw}`")))
}

fn marked_key(params: &ResolvedParams, keyspace_bits: u32) -> Result<Option<u64>> {
    let Some(raw) = params.opt_integer("marked_key") else {
        return Ok(None);
    };
    let marked = u64::try_from(raw).map_err(|_| {
        EngineError::Validation(format!("marked_key must be non-negative, got {raw}"))
    })?;
    if keyspace_bits < u64::BITS && marked >> keyspace_bits != 0 {
        return Err(EngineError::Validation(format!(
            "marked_key {marked} does not fit a {keyspace_bits}-bit keyspace"
        )));
    }
    Ok(Some(marked))
}

pub(super) fn validate(params: &ResolvedParams) -> Result<()> {
    let bits = params.bits("keyspace_bits")?;
    strategy(params)?;
    marked_key(params, bits)?;
    Ok(())
}

pub(super) async fn run(ctx: &ModuleContext) -> Result<()> {
    let params = ctx.params();
    let bits = params.bits("keyspace_bits")?;
    let version = ctx.formula_version()?;

    // The backend needs k + 1 qubits for a k-bit search.
    let backend_ceiling = ctx.backend().capability.max_qubits.saturating_sub(1);
    let estimate = ctx
        .estimator()
        .search_with_ceiling(bits, version, backend_ceiling)?;
    let draft = ctx
        .estimator()
        .search_draft(format!("{bits}-bit key search"), &estimate);

    if !estimate.within_simulation_ceiling {
        debug!(
            session_id = %ctx.session_id(),
            keyspace_bits = bits,
            confidence = estimate.confidence.value(),
            "keyspace above simulation ceiling, reporting formula estimate"
        );
        let evidence = draft.evidence.clone().with_detail("simulated", false);
        ctx.record(draft.evidence(evidence))?;
        return Ok(());
    }

    let strategy = strategy(params)?;
    let marked = match marked_key(params, bits)? {
        Some(marked) => marked,
        None => match 1u64.checked_shl(bits) {
            Some(keyspace) => ctx.ports().randomness.below(keyspace)?,
            None => ctx.ports().randomness.next_u64()?,
        },
    };
    let oracle = OracleDescriptor { marked };
    let run = ctx
        .run_job(JobSpec::BoundedSearch(SearchSpec {
            keyspace_bits: bits,
            oracle,
            strategy,
        }))
        .await?;

    let JobResult::Search(outcome) = run.result else {
        return Err(EngineError::Computation(
            "backend answered a search job with a different result kind".into(),
        ));
    };
    let found = outcome.found.is_some_and(|candidate| oracle.accepts(candidate));

    let evidence = Evidence {
        retry_count: run.retry_count,
        backend_job: Some(run.job.job_id),
        attempts: Some(outcome.oracle_queries),
        ..draft.evidence.clone()
    }
    .with_detail("simulated", true)
    .with_detail("strategy", format!("{strategy:?}").to_ascii_lowercase())
    .with_detail("found", found)
    .with_detail("success_probability", outcome.success_probability)
    .with_detail("backend", &ctx.backend().id);

    ctx.record(
        draft
            .evidence_ref(format!("job:{}", run.job.job_id))
            .evidence(evidence),
    )?;
    Ok(())
}
