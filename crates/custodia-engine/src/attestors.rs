//! M-of-N attestor set verification.
//!
//! An attestor set passes once `required_count` entries verify. Entries
//! are tried in declared order and verification short-circuits at the
//! threshold. Nested sets recurse as single entries. Key attestors whose
//! `public_keys` concatenate several PEM blocks are pre-expanded into one
//! entry per key, so the threshold counts keys rather than bundle fields.

use custodia_policy::attestation::Attestation;
use custodia_policy::attestor::{Attestor, AttestorSet};
use custodia_policy::verify::VerifyImages;

use crate::context::CancelToken;
use crate::image::ImageInfo;
use crate::verifier::{SignatureVerifier, VerifierError, VerifierOptions, VerifierResponse};

const PEM_END_MARKER: &str = "-----END PUBLIC KEY-----";

/// Split concatenated PEM public key blocks.
///
/// Splits after each END marker; content trailing the last marker is
/// dropped, and input without any marker yields nothing.
#[must_use]
pub fn split_pem(pem: &str) -> Vec<String> {
    pem.split_inclusive(PEM_END_MARKER)
        .filter(|block| block.ends_with(PEM_END_MARKER))
        .map(ToOwned::to_owned)
        .collect()
}

/// Expand multi-key PEM bundles into one entry per key.
///
/// Entries whose `keys.public_keys` hold more than one PEM block are
/// replaced by single-key copies preserving the entry's other fields;
/// all other entries pass through unchanged.
#[must_use]
pub fn expand_static_keys(set: &AttestorSet) -> AttestorSet {
    let mut entries = Vec::with_capacity(set.entries.len());
    for entry in &set.entries {
        if let Some(keys) = &entry.keys {
            let blocks = split_pem(&keys.public_keys);
            if blocks.len() > 1 {
                for block in blocks {
                    let mut expanded = entry.clone();
                    if let Some(expanded_keys) = &mut expanded.keys {
                        expanded_keys.public_keys = block;
                    }
                    entries.push(expanded);
                }
                continue;
            }
        }
        entries.push(entry.clone());
    }

    AttestorSet {
        count: set.count,
        entries,
    }
}

/// Verify an attestor set against an image.
///
/// Returns the response of the entry that crossed the threshold, or the
/// combined entry errors when fewer than `required_count` verified.
/// Network errors keep their sentinel through the breadcrumb wrapping so
/// the rule driver can classify them.
pub fn verify_attestor_set(
    verifier: &dyn SignatureVerifier,
    set: &AttestorSet,
    clause: &VerifyImages,
    info: &ImageInfo,
    path: &str,
    predicate_type: &str,
    cancel: &CancelToken,
) -> Result<VerifierResponse, VerifierError> {
    let set = expand_static_keys(set);
    let required = set.required_count();
    if set.entries.is_empty() {
        return Err(VerifierError::Verification(
            "no valid attestor entries after public key expansion".to_owned(),
        ));
    }

    let image = info.reference();
    let mut verified = 0usize;
    let mut errors = Vec::new();

    for (index, entry) in set.entries.iter().enumerate() {
        let attestor_path = format!("{path}.entries[{index}]");
        tracing::debug!(path = %attestor_path, image = %image, "verifying attestor");

        let result = if let Some(nested) = &entry.attestor {
            verify_attestor_set(
                verifier,
                nested,
                clause,
                info,
                &format!("{attestor_path}.attestor"),
                predicate_type,
                cancel,
            )
        } else {
            let attestation = Attestation {
                predicate_type: predicate_type.to_owned(),
                ..Attestation::default()
            };
            let (opts, subpath) = build_options_and_path(entry, clause, &image, &attestation);
            verifier
                .verify_signature(&opts, cancel)
                .map_err(|err| err.wrap(format!("{attestor_path}{subpath}")))
        };

        match result {
            Ok(response) => {
                verified += 1;
                if verified >= required {
                    tracing::debug!(verified, required, image = %image,
                        "image attestors verification succeeded");
                    return Ok(response);
                }
            }
            Err(err) => errors.push(err),
        }
    }

    if errors.is_empty() {
        errors.push(VerifierError::Verification(format!(
            "verified count {verified} is less than required count {required}"
        )));
    }
    let err = VerifierError::combine(errors);
    tracing::debug!(verified, required, image = %image, error = %err,
        "image attestors verification failed");
    Err(err)
}

/// Translate an attestor into verifier options, with the breadcrumb
/// subpath (`.keys`, `.certificates`, `.keyless`) used when wrapping
/// errors.
pub(crate) fn build_options_and_path(
    attestor: &Attestor,
    clause: &VerifyImages,
    image: &str,
    attestation: &Attestation,
) -> (VerifierOptions, String) {
    let mut path = String::new();
    let mut opts = VerifierOptions {
        image_ref: image.to_owned(),
        repository: clause.repository.clone(),
        annotations: clause.annotations.clone(),
        roots: clause.roots.clone(),
        predicate_type: attestation.predicate_type.clone(),
        fetch_attestations: !attestation.predicate_type.is_empty(),
        ..VerifierOptions::default()
    };

    if let Some(keys) = &attestor.keys {
        path.push_str(".keys");
        if !keys.public_keys.is_empty() {
            opts.key = keys.public_keys.clone();
        } else if let Some(secret) = &keys.secret {
            opts.key = format!("k8s://{}/{}", secret.namespace, secret.name);
        } else if !keys.kms.is_empty() {
            opts.key = keys.kms.clone();
        }
        if let Some(rekor) = &keys.rekor {
            opts.rekor_url = rekor.url.clone();
        }
        opts.signature_algorithm = keys.signature_algorithm.clone();
    } else if let Some(certificates) = &attestor.certificates {
        path.push_str(".certificates");
        opts.cert = certificates.certificate.clone();
        opts.cert_chain = certificates.certificate_chain.clone();
        if let Some(rekor) = &certificates.rekor {
            opts.rekor_url = rekor.url.clone();
        }
    } else if let Some(keyless) = &attestor.keyless {
        path.push_str(".keyless");
        if let Some(rekor) = &keyless.rekor {
            opts.rekor_url = rekor.url.clone();
        }
        opts.roots = keyless.roots.clone();
        opts.issuer = keyless.issuer.clone();
        opts.subject = keyless.subject.clone();
        opts.additional_extensions = keyless.additional_extensions.clone();
    }

    if let Some(repository) = &attestor.repository {
        opts.repository = repository.clone();
    }
    if let Some(annotations) = &attestor.annotations {
        opts.annotations = Some(annotations.clone());
    }

    (opts, path)
}
