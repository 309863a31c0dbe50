//! Per-admission rule orchestration.
//!
//! [`verify_and_patch_images`] walks a policy's rules against one
//! admission: extracts and matches images, loads rule-scoped context,
//! substitutes variables, runs attestor and attestation verification per
//! image, pins digests, and assembles the engine response. Errors never
//! escape a rule — each becomes a rule response — so the caller always
//! receives a complete answer.
//!
//! Re-admissions stay cheap: an image whose reference has not changed at
//! its pointer, or that the resource already records as verified, is
//! skipped without a rule response. Re-verifying every unchanged image on
//! every update would make registry availability an admission hazard.

use chrono::Utc;
use serde_json::Value;

use custodia_policy::rule::{ApplyRules, Policy, Rule};
use custodia_policy::verify::VerifyImages;

use crate::attestations;
use crate::attestors;
use crate::context::{ContextLoader, PolicyContext};
use crate::image::ImageInfo;
use crate::matcher::{self, matches_glob};
use crate::metadata::{self, ImageVerificationMetadata, VERIFY_IMAGES_ANNOTATION};
use crate::mutate;
use crate::response::{EngineResponse, RuleResponse, RuleStatus};
use crate::variables;
use crate::verifier::{SignatureVerifier, VerifierError, VerifierResponse};

/// Evaluate a policy's image verification rules against one admission.
///
/// Rules run in declared order; with [`ApplyRules::One`] evaluation stops
/// after the first rule that applies. Returns the engine response plus
/// the per-admission verification metadata a downstream stage serializes
/// into the [`VERIFY_IMAGES_ANNOTATION`] annotation.
pub fn verify_and_patch_images(
    verifier: &dyn SignatureVerifier,
    loader: &dyn ContextLoader,
    policy: &Policy,
    pctx: &mut PolicyContext,
) -> (EngineResponse, ImageVerificationMetadata) {
    let mut resp = EngineResponse::new(&policy.name);
    let mut ivm = ImageVerificationMetadata::default();
    let apply_rules = policy.apply_rules();

    tracing::debug!(policy = %policy.name, "processing image verification rules");

    pctx.eval_context_mut().checkpoint();
    for rule in &policy.rules {
        if rule.verify_images.is_empty() {
            continue;
        }
        if !rule_matches(rule, pctx.new_resource()) {
            continue;
        }

        tracing::debug!(rule = %rule.name, ?apply_rules, "processing image verification rule");
        process_rule(verifier, loader, rule, pctx, &mut resp, &mut ivm);

        if apply_rules == ApplyRules::One && resp.policy_response.rules_applied_count > 0 {
            break;
        }
    }
    pctx.eval_context_mut().restore();

    resp.timestamp = Utc::now();
    tracing::debug!(
        applied = resp.policy_response.rules_applied_count,
        errors = resp.policy_response.rules_error_count,
        successful = resp.is_successful(),
        "processed image verification rules"
    );
    (resp, ivm)
}

/// Whether a rule's match selectors accept the resource.
fn rule_matches(rule: &Rule, resource: &Value) -> bool {
    let Some(selectors) = &rule.match_resources else {
        return true;
    };

    let kind = resource.get("kind").and_then(Value::as_str).unwrap_or_default();
    let api_version = resource
        .get("apiVersion")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let name = resource
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let namespace = resource
        .pointer("/metadata/namespace")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let kind_ok = selectors.kinds.is_empty()
        || selectors.kinds.iter().any(|pattern| {
            matches_glob(kind, pattern) || matches_glob(&format!("{api_version}/{kind}"), pattern)
        });
    let name_ok = selectors.names.is_empty()
        || selectors.names.iter().any(|pattern| matches_glob(name, pattern));
    let namespace_ok = selectors.namespaces.is_empty()
        || selectors
            .namespaces
            .iter()
            .any(|pattern| matches_glob(namespace, pattern));

    kind_ok && name_ok && namespace_ok
}

/// Run one rule; every outcome lands in `resp` as a rule response.
fn process_rule(
    verifier: &dyn SignatureVerifier,
    loader: &dyn ContextLoader,
    rule: &Rule,
    pctx: &mut PolicyContext,
    resp: &mut EngineResponse,
    ivm: &mut ImageVerificationMetadata,
) {
    let images = match &rule.image_extractors {
        Some(configs) => pctx.custom_image_info(configs),
        None => pctx.image_info(),
    };
    let images = match images {
        Ok(images) => images,
        Err(err) => {
            resp.append(RuleResponse::new(
                &rule.name,
                format!("failed to extract images: {err}"),
                RuleStatus::Error,
            ));
            return;
        }
    };

    let (matched, patterns) = matcher::matching_images(&images, rule);
    if matched.is_empty() {
        resp.append(RuleResponse::new(
            &rule.name,
            format!("verification skipped, no resource image matches the patterns '{patterns}'"),
            RuleStatus::Skip,
        ));
        return;
    }

    pctx.eval_context_mut().checkpoint();
    evaluate_rule(verifier, loader, rule, &matched, pctx, resp, ivm);
    pctx.eval_context_mut().restore();
}

/// The context-scoped part of rule processing; runs between a
/// checkpoint/restore pair so rule bindings never leak to the next rule.
fn evaluate_rule(
    verifier: &dyn SignatureVerifier,
    loader: &dyn ContextLoader,
    rule: &Rule,
    matched: &[ImageInfo],
    pctx: &mut PolicyContext,
    resp: &mut EngineResponse,
    ivm: &mut ImageVerificationMetadata,
) {
    let cancel = pctx.cancel().clone();
    if let Err(err) = loader.load(&rule.context, pctx.eval_context_mut(), &cancel) {
        resp.append(RuleResponse::new(
            &rule.name,
            format!("failed to load context: {err}"),
            RuleStatus::Error,
        ));
        return;
    }

    let rule = match variables::substitute_rule(pctx.eval_context(), rule) {
        Ok(rule) => rule,
        Err(err) => {
            resp.append(RuleResponse::new(
                &rule.name,
                format!("failed to substitute variables: {err}"),
                RuleStatus::Error,
            ));
            return;
        }
    };

    for clause in &rule.verify_images {
        let clause = clause.normalize();
        verify_clause(verifier, &rule, &clause, matched, pctx, resp, ivm);
    }
}

/// Apply one clause to every matched image.
fn verify_clause(
    verifier: &dyn SignatureVerifier,
    rule: &Rule,
    clause: &VerifyImages,
    matched: &[ImageInfo],
    pctx: &mut PolicyContext,
    resp: &mut EngineResponse,
    ivm: &mut ImageVerificationMetadata,
) {
    for info in matched {
        let mut info = info.clone();
        let image = info.reference();

        if annotation_changed(pctx) {
            let message = format!("{VERIFY_IMAGES_ANNOTATION} annotation cannot be changed");
            tracing::debug!(reason = %message, "image verification error");
            resp.append(RuleResponse::new(&rule.name, message, RuleStatus::Fail));
            continue;
        }

        if matches!(pctx.has_changed(&info.pointer), Ok(false)) {
            tracing::debug!(image = %image, "image unchanged, skipping check");
            continue;
        }

        if metadata::image_verified_in(pctx.new_resource(), &image) {
            tracing::debug!(image = %image, "image already verified, skipping check");
            continue;
        }

        let (mut rule_resp, digest) = verify_image(verifier, &rule.name, clause, &info, pctx);

        let verified_so_far = rule_resp
            .as_ref()
            .map_or(true, |r| r.status == RuleStatus::Pass);
        if clause.mutate_digest && verified_so_far {
            let cancel = pctx.cancel().clone();
            match mutate::mutate_digest(verifier, &mut info, &digest, &cancel) {
                Ok(Some(patch)) => {
                    rule_resp
                        .get_or_insert_with(|| {
                            RuleResponse::new(
                                &rule.name,
                                "mutated image digest",
                                RuleStatus::Pass,
                            )
                        })
                        .patches
                        .push(patch);
                }
                Ok(None) => {}
                Err(err) => {
                    rule_resp = Some(RuleResponse::new(
                        &rule.name,
                        format!("failed to update digest: {err}"),
                        RuleStatus::Error,
                    ));
                }
            }
        }

        if let Some(rule_resp) = rule_resp {
            if clause.has_verification() {
                ivm.add(&info.reference(), rule_resp.status == RuleStatus::Pass);
            }
            resp.append(rule_resp);
        }
    }
}

/// Verify one image against one clause: attestors first, then
/// attestations. Returns the response (or `None` when the clause declares
/// no verification) plus any digest the verifier resolved.
fn verify_image(
    verifier: &dyn SignatureVerifier,
    rule_name: &str,
    clause: &VerifyImages,
    info: &ImageInfo,
    pctx: &mut PolicyContext,
) -> (Option<RuleResponse>, String) {
    if !clause.has_verification() {
        return (None, String::new());
    }

    let image = info.reference();
    tracing::debug!(image = %image,
        attestors = clause.attestors.len(), attestations = clause.attestations.len(),
        "verifying image signatures");

    if let Err(err) = pctx.eval_context_mut().add_image_info(info) {
        let message = format!("failed to add image to context {image}: {err}");
        return (
            Some(RuleResponse::new(rule_name, message, RuleStatus::Error)),
            String::new(),
        );
    }

    let mut digest = String::new();
    if !clause.attestors.is_empty() {
        match verify_attestors(verifier, clause, info, pctx) {
            Ok(response) => digest = response.digest,
            Err(err) => {
                let message = format!("failed to verify image {image}: {err}");
                return (
                    Some(classified_response(rule_name, message, &err)),
                    String::new(),
                );
            }
        }
    }

    if clause.attestations.is_empty() {
        let message = format!("verified image signatures for {image}");
        return (
            Some(RuleResponse::new(rule_name, message, RuleStatus::Pass)),
            digest,
        );
    }

    match attestations::verify_attestations(verifier, clause, info, pctx) {
        Ok(message) => (
            Some(RuleResponse::new(rule_name, message, RuleStatus::Pass)),
            digest,
        ),
        Err(err) => {
            let message = err.to_string();
            (Some(classified_response(rule_name, message, &err)), String::new())
        }
    }
}

/// Every attestor set of the clause must pass; the last set's response
/// carries the digest used for mutation.
fn verify_attestors(
    verifier: &dyn SignatureVerifier,
    clause: &VerifyImages,
    info: &ImageInfo,
    pctx: &PolicyContext,
) -> Result<VerifierResponse, VerifierError> {
    let mut last = VerifierResponse::default();
    for (index, set) in clause.attestors.iter().enumerate() {
        let path = format!(".attestors[{index}]");
        last = attestors::verify_attestor_set(
            verifier,
            set,
            clause,
            info,
            &path,
            "",
            pctx.cancel(),
        )?;
    }
    Ok(last)
}

/// Network and cancellation failures are availability problems, not
/// policy rejections — they surface as `Error` so the admission layer can
/// tell them apart.
fn classified_response(rule_name: &str, message: String, err: &VerifierError) -> RuleResponse {
    let status = if err.is_network() || err.is_cancelled() {
        RuleStatus::Error
    } else {
        RuleStatus::Fail
    };
    RuleResponse::new(rule_name, message, status)
}

/// Whether the verify-images annotation differs between the old and new
/// resource — a tamper attempt on create/update.
fn annotation_changed(pctx: &PolicyContext) -> bool {
    if pctx.new_resource().is_null() || pctx.old_resource().is_null() {
        return false;
    }
    let new_value = metadata::verify_annotation(pctx.new_resource());
    let old_value = metadata::verify_annotation(pctx.old_resource());
    let changed = new_value != old_value;
    if changed {
        tracing::debug!(?old_value, ?new_value, "verify-images annotation mismatch");
    }
    changed
}
