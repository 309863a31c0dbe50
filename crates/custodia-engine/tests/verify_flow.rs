//! End-to-end verification flows through the rule driver.
//!
//! Each test builds a resource and policy fixture, drives
//! `verify_and_patch_images` with a scripted verifier, and checks the
//! rule responses, patches, and metadata the engine produces.

use std::sync::Mutex;

use serde_json::{json, Value};

use custodia_engine::context::{CancelToken, NoContext, PolicyContext};
use custodia_engine::driver::verify_and_patch_images;
use custodia_engine::response::RuleStatus;
use custodia_engine::verifier::{
    Descriptor, SignatureVerifier, Statement, VerifierError, VerifierOptions, VerifierResponse,
};
use custodia_engine::VERIFY_IMAGES_ANNOTATION;
use custodia_policy::rule::Policy;

const KEY_A: &str = "-----BEGIN PUBLIC KEY-----\nAAA\n-----END PUBLIC KEY-----";
const KEY_B: &str = "-----BEGIN PUBLIC KEY-----\nBBB\n-----END PUBLIC KEY-----";
const KEY_C: &str = "-----BEGIN PUBLIC KEY-----\nCCC\n-----END PUBLIC KEY-----";
const DIGEST: &str = "sha256:deadbeef0001";

/// Scripted verifier: signature outcomes keyed by key substring, a fixed
/// digest, canned statements, and an optional global network failure.
#[derive(Default)]
struct ScriptedVerifier {
    digest: String,
    fail_keys: Vec<&'static str>,
    network: bool,
    statements: Vec<Statement>,
    signature_calls: Mutex<Vec<String>>,
}

impl ScriptedVerifier {
    fn passing() -> Self {
        Self {
            digest: DIGEST.to_owned(),
            ..Self::default()
        }
    }
}

impl SignatureVerifier for ScriptedVerifier {
    fn verify_signature(
        &self,
        opts: &VerifierOptions,
        _cancel: &CancelToken,
    ) -> Result<VerifierResponse, VerifierError> {
        self.signature_calls.lock().unwrap().push(opts.key.clone());
        if self.network {
            return Err(VerifierError::Network(
                "dial tcp: connection refused".to_owned(),
            ));
        }
        if self.fail_keys.iter().any(|k| opts.key.contains(k)) {
            return Err(VerifierError::Verification(
                "no matching signatures".to_owned(),
            ));
        }
        Ok(VerifierResponse {
            digest: self.digest.clone(),
            statements: Vec::new(),
        })
    }

    fn fetch_attestations(
        &self,
        _opts: &VerifierOptions,
        _cancel: &CancelToken,
    ) -> Result<VerifierResponse, VerifierError> {
        if self.network {
            return Err(VerifierError::Network(
                "dial tcp: connection refused".to_owned(),
            ));
        }
        Ok(VerifierResponse {
            digest: String::new(),
            statements: self.statements.clone(),
        })
    }

    fn fetch_image_descriptor(
        &self,
        _image_ref: &str,
        _cancel: &CancelToken,
    ) -> Result<Descriptor, VerifierError> {
        if self.network {
            return Err(VerifierError::Network("lookup failed".to_owned()));
        }
        Ok(Descriptor {
            digest: self.digest.clone(),
        })
    }
}

fn pod(images: &[(&str, &str)]) -> Value {
    let containers: Vec<Value> = images
        .iter()
        .map(|(name, image)| json!({ "name": name, "image": image }))
        .collect();
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "name": "app", "namespace": "prod" },
        "spec": { "containers": containers }
    })
}

fn policy(value: Value) -> Policy {
    serde_json::from_value(value).unwrap()
}

// ── S1: digest mutation ─────────────────────────────────────────────

#[test]
fn digest_mutation_emits_replace_patch() {
    let policy = policy(json!({
        "name": "pin-digests",
        "rules": [{
            "name": "verify-and-pin",
            "verifyImages": [{
                "imageReferences": ["gcr.io/foo/*"],
                "mutateDigest": true,
                "attestors": [{ "entries": [{ "keys": { "publicKeys": KEY_A } }] }]
            }]
        }]
    }));
    let mut pctx = PolicyContext::new(pod(&[("bar", "gcr.io/foo/bar:v1")]));

    let verifier = ScriptedVerifier::passing();
    let (resp, ivm) = verify_and_patch_images(&verifier, &NoContext, &policy, &mut pctx);

    let rule = &resp.policy_response.rules[0];
    assert_eq!(rule.status, RuleStatus::Pass);
    assert_eq!(
        rule.patches,
        vec![json!({
            "op": "replace",
            "path": "/spec/containers/0/image",
            "value": format!("gcr.io/foo/bar:v1@{DIGEST}")
        })]
    );
    assert!(ivm.is_verified(&format!("gcr.io/foo/bar:v1@{DIGEST}")));
}

#[test]
fn no_patch_when_image_already_pinned() {
    let policy = policy(json!({
        "name": "pin-digests",
        "rules": [{
            "name": "verify-and-pin",
            "verifyImages": [{
                "imageReferences": ["gcr.io/foo/*"],
                "mutateDigest": true,
                "attestors": [{ "entries": [{ "keys": { "publicKeys": KEY_A } }] }]
            }]
        }]
    }));
    let mut pctx = PolicyContext::new(pod(&[("bar", "gcr.io/foo/bar:v1@sha256:already")]));

    let verifier = ScriptedVerifier::passing();
    let (resp, _) = verify_and_patch_images(&verifier, &NoContext, &policy, &mut pctx);

    let rule = &resp.policy_response.rules[0];
    assert_eq!(rule.status, RuleStatus::Pass);
    assert!(rule.patches.is_empty());
}

#[test]
fn no_patch_without_mutate_digest() {
    let policy = policy(json!({
        "name": "verify-only",
        "rules": [{
            "name": "verify",
            "verifyImages": [{
                "imageReferences": ["gcr.io/foo/*"],
                "attestors": [{ "entries": [{ "keys": { "publicKeys": KEY_A } }] }]
            }]
        }]
    }));
    let mut pctx = PolicyContext::new(pod(&[("bar", "gcr.io/foo/bar:v1")]));

    let verifier = ScriptedVerifier::passing();
    let (resp, _) = verify_and_patch_images(&verifier, &NoContext, &policy, &mut pctx);
    assert!(resp.policy_response.rules[0].patches.is_empty());
}

// ── S2: threshold 2 of 3 ────────────────────────────────────────────

#[test]
fn threshold_two_of_three_passes_despite_one_failure() {
    let policy = policy(json!({
        "name": "threshold",
        "rules": [{
            "name": "two-of-three",
            "verifyImages": [{
                "imageReferences": ["ghcr.io/org/*"],
                "attestors": [{
                    "count": 2,
                    "entries": [
                        { "keys": { "publicKeys": KEY_A } },
                        { "keys": { "publicKeys": KEY_B } },
                        { "keys": { "publicKeys": KEY_C } }
                    ]
                }]
            }]
        }]
    }));
    let mut pctx = PolicyContext::new(pod(&[("app", "ghcr.io/org/app:v1")]));

    let verifier = ScriptedVerifier {
        fail_keys: vec!["BBB"],
        ..ScriptedVerifier::passing()
    };
    let (resp, _) = verify_and_patch_images(&verifier, &NoContext, &policy, &mut pctx);

    let rule = &resp.policy_response.rules[0];
    assert_eq!(rule.status, RuleStatus::Pass);
    // B's error does not surface in a passing response.
    assert!(!rule.message.contains("no matching signatures"));
    // Short-circuit after C crosses the threshold.
    assert_eq!(verifier.signature_calls.lock().unwrap().len(), 3);
}

// ── S3: network error ───────────────────────────────────────────────

#[test]
fn network_failure_is_error_not_fail() {
    let policy = policy(json!({
        "name": "net",
        "rules": [{
            "name": "verify",
            "verifyImages": [{
                "imageReferences": ["ghcr.io/org/*"],
                "mutateDigest": true,
                "attestors": [{ "entries": [{ "keys": { "publicKeys": KEY_A } }] }]
            }]
        }]
    }));
    let mut pctx = PolicyContext::new(pod(&[("app", "ghcr.io/org/app:v1")]));

    let verifier = ScriptedVerifier {
        network: true,
        ..ScriptedVerifier::passing()
    };
    let (resp, _) = verify_and_patch_images(&verifier, &NoContext, &policy, &mut pctx);

    let rule = &resp.policy_response.rules[0];
    assert_eq!(rule.status, RuleStatus::Error);
    assert!(rule.message.contains("ghcr.io/org/app:v1"));
    assert!(rule.patches.is_empty());
}

#[test]
fn crypto_failure_is_fail() {
    let policy = policy(json!({
        "name": "crypto",
        "rules": [{
            "name": "verify",
            "verifyImages": [{
                "imageReferences": ["ghcr.io/org/*"],
                "attestors": [{ "entries": [{ "keys": { "publicKeys": KEY_A } }] }]
            }]
        }]
    }));
    let mut pctx = PolicyContext::new(pod(&[("app", "ghcr.io/org/app:v1")]));

    let verifier = ScriptedVerifier {
        fail_keys: vec!["AAA"],
        ..ScriptedVerifier::passing()
    };
    let (resp, ivm) = verify_and_patch_images(&verifier, &NoContext, &policy, &mut pctx);

    assert_eq!(resp.policy_response.rules[0].status, RuleStatus::Fail);
    assert!(!ivm.is_verified("ghcr.io/org/app:v1"));
}

// ── S4: attestation predicate missing ───────────────────────────────

#[test]
fn missing_predicate_type_fails_with_exact_message() {
    let policy = policy(json!({
        "name": "provenance",
        "rules": [{
            "name": "require-slsa",
            "verifyImages": [{
                "imageReferences": ["ghcr.io/org/*"],
                "attestations": [{
                    "predicateType": "https://slsa.dev/provenance/v0.2"
                }]
            }]
        }]
    }));
    let mut pctx = PolicyContext::new(pod(&[("app", "ghcr.io/org/app:v1")]));

    let verifier = ScriptedVerifier {
        statements: vec![serde_json::from_value(json!({
            "_type": "https://in-toto.io/Statement/v0.1",
            "predicateType": "cosign.sigstore.dev/attestation/v1",
            "predicate": { "Data": "hello" }
        }))
        .unwrap()],
        ..ScriptedVerifier::passing()
    };
    let (resp, _) = verify_and_patch_images(&verifier, &NoContext, &policy, &mut pctx);

    let rule = &resp.policy_response.rules[0];
    assert_eq!(rule.status, RuleStatus::Fail);
    assert!(rule
        .message
        .contains("predicate type https://slsa.dev/provenance/v0.2 not found"));
}

#[test]
fn attestation_conditions_gate_the_rule() {
    let policy = policy(json!({
        "name": "provenance",
        "rules": [{
            "name": "require-builder",
            "verifyImages": [{
                "imageReferences": ["ghcr.io/org/*"],
                "attestations": [{
                    "predicateType": "https://slsa.dev/provenance/v0.2",
                    "conditions": [{
                        "all": [{
                            "key": "{{ builder.id }}",
                            "operator": "Equals",
                            "value": "https://builder.example.com"
                        }]
                    }]
                }]
            }]
        }]
    }));

    let statement = |builder: &str| -> Statement {
        serde_json::from_value(json!({
            "_type": "https://in-toto.io/Statement/v0.1",
            "predicateType": "https://slsa.dev/provenance/v0.2",
            "predicate": { "builder": { "id": builder } }
        }))
        .unwrap()
    };

    let good = ScriptedVerifier {
        statements: vec![statement("https://builder.example.com")],
        ..ScriptedVerifier::passing()
    };
    let mut pctx = PolicyContext::new(pod(&[("app", "ghcr.io/org/app:v1")]));
    let (resp, ivm) = verify_and_patch_images(&good, &NoContext, &policy, &mut pctx);
    assert_eq!(resp.policy_response.rules[0].status, RuleStatus::Pass);
    assert!(ivm.is_verified("ghcr.io/org/app:v1"));

    let bad = ScriptedVerifier {
        statements: vec![statement("https://rogue.example.com")],
        ..ScriptedVerifier::passing()
    };
    let mut pctx = PolicyContext::new(pod(&[("app", "ghcr.io/org/app:v1")]));
    let (resp, _) = verify_and_patch_images(&bad, &NoContext, &policy, &mut pctx);
    let rule = &resp.policy_response.rules[0];
    assert_eq!(rule.status, RuleStatus::Fail);
    assert!(rule.message.contains(".attestations[0].attestors[0].entries[0]"));
}

// ── S5: multi-PEM expansion ─────────────────────────────────────────

#[test]
fn concatenated_pem_bundle_requires_every_key() {
    let bundle = format!("{KEY_A}\n{KEY_B}");
    let policy = policy(json!({
        "name": "bundle",
        "rules": [{
            "name": "verify",
            "verifyImages": [{
                "imageReferences": ["ghcr.io/org/*"],
                "attestors": [{ "entries": [{ "keys": { "publicKeys": bundle } }] }]
            }]
        }]
    }));

    // Both keys pass: rule passes, two verifier calls.
    let verifier = ScriptedVerifier::passing();
    let mut pctx = PolicyContext::new(pod(&[("app", "ghcr.io/org/app:v1")]));
    let (resp, _) = verify_and_patch_images(&verifier, &NoContext, &policy, &mut pctx);
    assert_eq!(resp.policy_response.rules[0].status, RuleStatus::Pass);
    assert_eq!(verifier.signature_calls.lock().unwrap().len(), 2);

    // One key fails: required defaults to the expanded count, so the rule fails.
    let verifier = ScriptedVerifier {
        fail_keys: vec!["BBB"],
        ..ScriptedVerifier::passing()
    };
    let mut pctx = PolicyContext::new(pod(&[("app", "ghcr.io/org/app:v1")]));
    let (resp, _) = verify_and_patch_images(&verifier, &NoContext, &policy, &mut pctx);
    assert_eq!(resp.policy_response.rules[0].status, RuleStatus::Fail);
}

// ── S6: idempotent re-admission ─────────────────────────────────────

#[test]
fn unchanged_verified_image_is_skipped_silently() {
    let policy = policy(json!({
        "name": "idempotent",
        "rules": [{
            "name": "verify",
            "verifyImages": [{
                "imageReferences": ["ghcr.io/org/*"],
                "attestors": [{ "entries": [{ "keys": { "publicKeys": KEY_A } }] }]
            }]
        }]
    }));

    let annotation = r#"{"ghcr.io/org/app:v1":true}"#;
    let mut new_resource = pod(&[("app", "ghcr.io/org/app:v1"), ("new", "ghcr.io/org/new:v2")]);
    new_resource["metadata"]["annotations"] = json!({ VERIFY_IMAGES_ANNOTATION: annotation });
    let mut old_resource = pod(&[("app", "ghcr.io/org/app:v1")]);
    old_resource["metadata"]["annotations"] = json!({ VERIFY_IMAGES_ANNOTATION: annotation });

    let mut pctx = PolicyContext::new(new_resource).with_old_resource(old_resource);
    let verifier = ScriptedVerifier::passing();
    let (resp, ivm) = verify_and_patch_images(&verifier, &NoContext, &policy, &mut pctx);

    // Only the new, unverified image gets a rule response.
    assert_eq!(resp.policy_response.rules.len(), 1);
    assert!(resp.policy_response.rules[0]
        .message
        .contains("ghcr.io/org/new:v2"));
    assert!(ivm.is_verified("ghcr.io/org/new:v2"));
    // The already-verified image was never re-verified.
    let calls = verifier.signature_calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
}

// ── Cross-cutting invariants ────────────────────────────────────────

#[test]
fn context_depth_is_balanced_across_outcomes() {
    let policy = policy(json!({
        "name": "mixed",
        "rules": [
            {
                "name": "skip-me",
                "verifyImages": [{ "imageReferences": ["quay.io/none/*"] }]
            },
            {
                "name": "fail-me",
                "verifyImages": [{
                    "imageReferences": ["ghcr.io/org/*"],
                    "attestors": [{ "entries": [{ "keys": { "publicKeys": KEY_A } }] }]
                }]
            }
        ]
    }));
    let mut pctx = PolicyContext::new(pod(&[("app", "ghcr.io/org/app:v1")]));

    let verifier = ScriptedVerifier {
        fail_keys: vec!["AAA"],
        ..ScriptedVerifier::passing()
    };
    let before = pctx.eval_context().depth();
    let _ = verify_and_patch_images(&verifier, &NoContext, &policy, &mut pctx);
    assert_eq!(pctx.eval_context().depth(), before);
}

#[test]
fn repeated_verification_is_deterministic() {
    let policy = policy(json!({
        "name": "deterministic",
        "rules": [{
            "name": "verify",
            "verifyImages": [{
                "imageReferences": ["ghcr.io/org/*"],
                "attestors": [{ "entries": [{ "keys": { "publicKeys": KEY_A } }] }]
            }]
        }]
    }));

    let run = || {
        let verifier = ScriptedVerifier::passing();
        let mut pctx = PolicyContext::new(pod(&[("app", "ghcr.io/org/app:v1")]));
        verify_and_patch_images(&verifier, &NoContext, &policy, &mut pctx)
    };

    let (first, first_ivm) = run();
    let (second, second_ivm) = run();
    assert_eq!(first.policy_response, second.policy_response);
    assert_eq!(first_ivm, second_ivm);
}

#[test]
fn every_rule_erroring_still_yields_complete_response() {
    let policy = policy(json!({
        "name": "all-errors",
        "rules": [
            {
                "name": "a",
                "verifyImages": [{
                    "imageReferences": ["ghcr.io/org/*"],
                    "attestors": [{ "entries": [{ "keys": { "publicKeys": KEY_A } }] }]
                }]
            },
            {
                "name": "b",
                "verifyImages": [{
                    "imageReferences": ["ghcr.io/org/*"],
                    "attestors": [{ "entries": [{ "keys": { "publicKeys": KEY_B } }] }]
                }]
            }
        ]
    }));
    let mut pctx = PolicyContext::new(pod(&[("app", "ghcr.io/org/app:v1")]));

    let verifier = ScriptedVerifier {
        network: true,
        ..ScriptedVerifier::passing()
    };
    let (resp, _) = verify_and_patch_images(&verifier, &NoContext, &policy, &mut pctx);

    assert_eq!(resp.policy_response.rules.len(), 2);
    assert!(resp
        .policy_response
        .rules
        .iter()
        .all(|rule| rule.status == RuleStatus::Error));
    assert_eq!(resp.policy_response.rules_error_count, 2);
}

#[test]
fn cancellation_surfaces_as_rule_error() {
    struct CancelAware;
    impl SignatureVerifier for CancelAware {
        fn verify_signature(
            &self,
            _opts: &VerifierOptions,
            cancel: &CancelToken,
        ) -> Result<VerifierResponse, VerifierError> {
            if cancel.is_cancelled() {
                return Err(VerifierError::Cancelled);
            }
            Ok(VerifierResponse::default())
        }

        fn fetch_attestations(
            &self,
            _opts: &VerifierOptions,
            _cancel: &CancelToken,
        ) -> Result<VerifierResponse, VerifierError> {
            Ok(VerifierResponse::default())
        }

        fn fetch_image_descriptor(
            &self,
            _image_ref: &str,
            _cancel: &CancelToken,
        ) -> Result<Descriptor, VerifierError> {
            Ok(Descriptor::default())
        }
    }

    let policy = policy(json!({
        "name": "deadline",
        "rules": [{
            "name": "verify",
            "verifyImages": [{
                "imageReferences": ["ghcr.io/org/*"],
                "attestors": [{ "entries": [{ "keys": { "publicKeys": KEY_A } }] }]
            }]
        }]
    }));

    let cancel = CancelToken::new();
    cancel.cancel();
    let mut pctx =
        PolicyContext::new(pod(&[("app", "ghcr.io/org/app:v1")])).with_cancel(cancel);

    let (resp, _) = verify_and_patch_images(&CancelAware, &NoContext, &policy, &mut pctx);
    assert_eq!(resp.policy_response.rules[0].status, RuleStatus::Error);
}
