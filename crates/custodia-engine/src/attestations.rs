//! In-toto attestation verification.
//!
//! For each attestation clause the engine fetches statements through the
//! signature verifier, selects those whose `predicateType` matches, and
//! evaluates the clause's conditions against every selected statement.
//! Attestor sets apply the same threshold semantics as signature
//! verification; an empty set means "no signer constraint".

use std::collections::BTreeMap;

use custodia_policy::attestation::Attestation;
use custodia_policy::attestor::{Attestor, AttestorSet};
use custodia_policy::verify::VerifyImages;

use crate::attestors::build_options_and_path;
use crate::context::PolicyContext;
use crate::image::ImageInfo;
use crate::variables;
use crate::verifier::{SignatureVerifier, Statement, VerifierError};

/// Verify every attestation clause of `clause` against an image.
///
/// Returns the pass message, or the first failure wrapped with its
/// attestor breadcrumb path.
pub fn verify_attestations(
    verifier: &dyn SignatureVerifier,
    clause: &VerifyImages,
    info: &ImageInfo,
    pctx: &mut PolicyContext,
) -> Result<String, VerifierError> {
    let image = info.reference();
    let default_set = [AttestorSet::default()];
    let default_entry = [Attestor::default()];

    for (i, attestation) in clause.attestations.iter().enumerate() {
        let path = format!(".attestations[{i}]");

        let sets: &[AttestorSet] = if attestation.attestors.is_empty() {
            &default_set
        } else {
            &attestation.attestors
        };

        for (j, set) in sets.iter().enumerate() {
            let attestor_path = format!("{path}.attestors[{j}]");
            let required = set.required_count();
            let mut verified = 0usize;

            let entries: &[Attestor] = if set.entries.is_empty() {
                &default_entry
            } else {
                &set.entries
            };

            for (k, entry) in entries.iter().enumerate() {
                let entry_path = format!("{attestor_path}.entries[{k}]");
                let (opts, subpath) = build_options_and_path(entry, clause, &image, attestation);

                let response = verifier
                    .fetch_attestations(&opts, pctx.cancel())
                    .map_err(|err| err.wrap(format!("failed to fetch attestations {image}")))?;

                verified += 1;
                if let Err(err) = verify_attestation(&response.statements, attestation, info, pctx)
                {
                    return Err(err.wrap(format!("{entry_path}{subpath}")));
                }

                if verified >= required {
                    let message = format!(
                        "image attestations verification succeeded, \
                         verified count: {verified}, required count: {required}"
                    );
                    tracing::debug!(image = %image, %message, "attestation threshold met");
                    return Ok(message);
                }
            }
        }

        tracing::debug!(path = %path, image = %image,
            predicate_type = %attestation.predicate_type, "attestation checks passed");
    }

    Ok(format!("verified image attestations for {image}"))
}

/// Check one fetched statement batch against an attestation clause.
fn verify_attestation(
    statements: &[Statement],
    attestation: &Attestation,
    info: &ImageInfo,
    pctx: &mut PolicyContext,
) -> Result<(), VerifierError> {
    let by_predicate = statements_by_predicate(statements);
    tracing::debug!(image = %info.reference(),
        predicates = ?by_predicate.keys().collect::<Vec<_>>(), "checking attestations");

    let Some(selected) = by_predicate.get(attestation.predicate_type.as_str()) else {
        return Err(VerifierError::Verification(format!(
            "predicate type {} not found",
            attestation.predicate_type
        )));
    };

    for statement in selected {
        let passed = check_statement(attestation, statement, pctx).map_err(|err| {
            VerifierError::Verification(err.to_string()).wrap("failed to check attestations")
        })?;

        if !passed {
            return Err(VerifierError::Verification(format!(
                "attestation checks failed for {} and predicate {}",
                info.reference(),
                attestation.predicate_type
            )));
        }
    }

    Ok(())
}

/// Evaluate conditions over one statement with the context checkpointed,
/// so statement bindings never leak into the next statement.
fn check_statement(
    attestation: &Attestation,
    statement: &Statement,
    pctx: &mut PolicyContext,
) -> Result<bool, crate::error::EngineError> {
    if attestation.conditions.is_empty() {
        return Ok(true);
    }

    let ctx = pctx.eval_context_mut();
    ctx.checkpoint();
    let result = variables::evaluate_statement_conditions(ctx, &attestation.conditions, statement);
    ctx.restore();
    result
}

/// Group statements by their predicate type.
fn statements_by_predicate(statements: &[Statement]) -> BTreeMap<&str, Vec<&Statement>> {
    let mut out: BTreeMap<&str, Vec<&Statement>> = BTreeMap::new();
    for statement in statements {
        out.entry(statement.predicate_type.as_str())
            .or_default()
            .push(statement);
    }
    out
}
