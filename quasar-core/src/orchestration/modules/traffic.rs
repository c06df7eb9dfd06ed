use quasar_model::{ArtifactKind, Target};

use crate::error::{EngineError, Result};
use crate::estimation::{KeyFamily, RiskTier};
use crate::orchestration::context::ModuleContext;
use crate::ports::HashAlgorithm;
use crate::registry::ResolvedParams;

fn missing_handshake(target: &Target) -> EngineError {
    EngineError::Validation(format!(
        "target `{}` has no captured handshake artifact",
        target.id
    ))
}

pub(super) fn validate(params: &ResolvedParams, target: &Target) -> Result<()> {
    params.string("key_exchange")?.parse::<KeyFamily>()?;
    params.bits("key_exchange_bits")?;
    params.bits("cipher_bits")?;
    if target.artifacts_of(ArtifactKind::Handshake).next().is_none() {
        return Err(missing_handshake(target));
    }
    Ok(())
}

/// Harvest-now-decrypt-later: how exposed is a recorded session once the key
/// exchange falls, and how much does amplified search erode the session
/// cipher on its own.
pub(super) async fn run(ctx: &ModuleContext) -> Result<()> {
    let target = ctx.target();
    let handshake = target
        .artifacts_of(ArtifactKind::Handshake)
        .next()
        .ok_or_else(|| missing_handshake(target))?;
    let digest = ctx
        .ports()
        .hash
        .hex_digest(HashAlgorithm::Sha256, &handshake.bytes);
    let evidence_ref = format!("sha256:{digest}");

    let params = ctx.params();
    let family: KeyFamily = params.string("key_exchange")?.parse()?;
    let kx_bits = params.bits("key_exchange_bits")?;
    let cipher_bits = params.bits("cipher_bits")?;
    let version = ctx.formula_version()?;
    let estimator = ctx.estimator();

    let key_exchange = estimator.structural(family, kx_bits, version)?;
    let draft = estimator.structural_draft(
        format!("{}-{kx_bits} key exchange", family.label()),
        &key_exchange,
    );
    let evidence = draft
        .evidence
        .clone()
        .with_detail("artifact", &handshake.label)
        .with_detail("recorded_traffic_exposed", key_exchange.tier != RiskTier::Safe);
    ctx.record(draft.evidence_ref(evidence_ref.clone()).evidence(evidence))?;

    ctx.checkpoint()?;

    let cipher = estimator.search(cipher_bits, version)?;
    let draft = estimator.search_draft(format!("{cipher_bits}-bit session cipher"), &cipher);
    let evidence = draft
        .evidence
        .clone()
        .with_detail("artifact", &handshake.label);
    ctx.record(draft.evidence_ref(evidence_ref).evidence(evidence))?;
    Ok(())
}
