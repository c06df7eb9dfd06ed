use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use quasar_model::{ArtifactKind, Target};
use regex::Regex;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::estimation::KeyFamily;
use crate::orchestration::context::ModuleContext;
use crate::ports::{CommandRequest, HashAlgorithm, ResolvedExecutable};
use crate::registry::ResolvedParams;

/// Key facts extracted from an inspection tool's text output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyInfo {
    pub family: KeyFamily,
    pub bits: u32,
    /// Algorithm name as printed by the tool.
    pub algorithm: String,
}

fn family_for(algorithm: &str) -> Result<KeyFamily> {
    match algorithm.to_ascii_lowercase().as_str() {
        "rsaencryption" | "rsassa-pss" => Ok(KeyFamily::Rsa),
        "dsaencryption" => Ok(KeyFamily::Dsa),
        "dhpublicnumber" | "dhkeyagreement" => Ok(KeyFamily::FiniteFieldDh),
        other => other.parse().map_err(|_| {
            EngineError::Computation(format!("unsupported public key algorithm `{algorithm}`"))
        }),
    }
}

/// Parses the `Public Key Algorithm:` and `Public-Key: (N bit)` lines of an
/// x509 text dump.
pub fn parse_public_key(text: &str) -> Result<PublicKeyInfo> {
    let regex_error = |err: regex::Error| EngineError::Internal(err.to_string());
    let size = Regex::new(r"Public-Key:\s*\((\d+)\s*bit\)").map_err(regex_error)?;
    let algorithm = Regex::new(r"Public Key Algorithm:\s*(\S+)").map_err(regex_error)?;

    let bits = size
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .ok_or_else(|| {
            EngineError::Computation("inspection output carries no public key size".into())
        })?;
    let algorithm = algorithm
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| {
            EngineError::Computation(
                "inspection output carries no public key algorithm".into(),
            )
        })?;

    Ok(PublicKeyInfo {
        family: family_for(&algorithm)?,
        bits,
        algorithm,
    })
}

fn program(params: &ResolvedParams) -> Result<ResolvedExecutable> {
    let path = params.path("tool_path")?;
    ResolvedExecutable::new(&path).map_err(|err| {
        EngineError::Validation(format!("tool_path `{}`: {err}", path.display()))
    })
}

fn timeout(params: &ResolvedParams) -> Result<Duration> {
    let millis = params.integer("timeout_ms")?;
    match u64::try_from(millis) {
        Ok(millis) if millis > 0 => Ok(Duration::from_millis(millis)),
        _ => Err(EngineError::Validation(format!(
            "timeout_ms must be positive, got {millis}"
        ))),
    }
}

fn tool_args(params: &ResolvedParams) -> Result<Vec<String>> {
    let args: Vec<String> = params
        .string("tool_args")?
        .split_whitespace()
        .map(str::to_string)
        .collect();
    if args.iter().any(|arg| arg.contains('\0')) {
        return Err(EngineError::Validation("tool_args contain a NUL byte".into()));
    }
    Ok(args)
}

pub(super) fn validate(params: &ResolvedParams, target: &Target) -> Result<()> {
    program(params)?;
    timeout(params)?;
    tool_args(params)?;
    if target.artifacts_of(ArtifactKind::Certificate).next().is_none() {
        return Err(EngineError::Validation(format!(
            "target `{}` has no certificate artifact",
            target.id
        )));
    }
    Ok(())
}

/// Inspects every certificate concurrently and records one finding per
/// certificate as each inspection completes.
pub(super) async fn run(ctx: &ModuleContext) -> Result<()> {
    let params = ctx.params();
    let program = program(params)?;
    let timeout = timeout(params)?;
    let args = tool_args(params)?;
    let version = ctx.formula_version()?;

    let mut pending: FuturesUnordered<_> = ctx
        .target()
        .artifacts_of(ArtifactKind::Certificate)
        .map(|artifact| {
            let request = CommandRequest::new(program.clone(), timeout)
                .args(args.iter().cloned())
                .stdin(artifact.bytes.clone());
            let command = Arc::clone(&ctx.ports().command);
            async move { (artifact, command.run(request).await) }
        })
        .collect();

    loop {
        let next = tokio::select! {
            biased;
            err = ctx.interrupt().fired() => return Err(err),
            next = pending.next() => next,
        };
        let Some((artifact, output)) = next else {
            break;
        };
        let output = output?;
        let key = parse_public_key(&output.stdout)?;
        debug!(
            session_id = %ctx.session_id(),
            artifact = %artifact.label,
            algorithm = %key.algorithm,
            bits = key.bits,
            "certificate inspected"
        );

        let estimate = ctx.estimator().structural(key.family, key.bits, version)?;
        let digest = ctx
            .ports()
            .hash
            .hex_digest(HashAlgorithm::Sha256, &artifact.bytes);
        let draft = ctx.estimator().structural_draft(
            format!("{}-{} certificate key", key.family.label(), key.bits),
            &estimate,
        );
        let evidence = draft
            .evidence
            .clone()
            .with_detail("artifact", &artifact.label)
            .with_detail("key_algorithm", &key.algorithm);
        ctx.record(
            draft
                .evidence_ref(format!("sha256:{digest}"))
                .evidence(evidence),
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSA_DUMP: &str = "\
Certificate:
    Data:
        Subject Public Key Info:
            Public Key Algorithm: rsaEncryption
                Public-Key: (2048 bit)
                Modulus:
";

    #[test]
    fn parses_rsa_dump() {
        let info = parse_public_key(RSA_DUMP).unwrap();
        assert_eq!(info.family, KeyFamily::Rsa);
        assert_eq!(info.bits, 2048);
        assert_eq!(info.algorithm, "rsaEncryption");
    }

    #[test]
    fn parses_ec_dump() {
        let dump = "Public Key Algorithm: id-ecPublicKey\n    Public-Key: (256 bit)\n";
        let info = parse_public_key(dump).unwrap();
        assert_eq!(info.family, KeyFamily::EllipticCurve);
        assert_eq!(info.bits, 256);
    }

    #[test]
    fn missing_size_is_a_computation_error() {
        let err = parse_public_key("Public Key Algorithm: rsaEncryption\n").unwrap_err();
        assert!(matches!(err, EngineError::Computation(_)));
    }

    #[test]
    fn unknown_algorithm_is_a_computation_error() {
        let dump = "Public Key Algorithm: ED25519\n    Public-Key: (256 bit)\n";
        assert!(matches!(
            parse_public_key(dump),
            Err(EngineError::Computation(_))
        ));
    }
}
