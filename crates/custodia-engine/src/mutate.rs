//! Digest pinning patches.
//!
//! After a passing verification, a clause with `mutate_digest` pins the
//! image by digest: the engine resolves one (reusing the verifier's if it
//! returned one, else fetching the registry descriptor) and emits an
//! RFC-6902 `replace` patch at the image's JSON Pointer. Images that
//! already carry a digest are left alone, keeping re-admissions
//! idempotent.

use serde_json::Value;

use crate::context::CancelToken;
use crate::image::ImageInfo;
use crate::verifier::{SignatureVerifier, VerifierError};

/// Build the digest patch for an image.
///
/// The operation is `replace` — the pointer names an existing string
/// field, never a missing one.
#[must_use]
pub fn digest_patch(info: &ImageInfo, digest: &str) -> Value {
    serde_json::json!({
        "op": "replace",
        "path": info.pointer,
        "value": format!("{}@{digest}", info.reference()),
    })
}

/// Pin an image by digest when it has none.
///
/// Returns `None` when the image already carries a digest. Otherwise
/// resolves one — `candidate` (from the verifier response) when
/// non-empty, else the registry descriptor — emits the patch, and records
/// the digest on `info` so later logging shows the pinned form.
pub fn mutate_digest(
    verifier: &dyn SignatureVerifier,
    info: &mut ImageInfo,
    candidate: &str,
    cancel: &CancelToken,
) -> Result<Option<Value>, VerifierError> {
    if !info.digest.is_empty() {
        return Ok(None);
    }

    let digest = if candidate.is_empty() {
        verifier
            .fetch_image_descriptor(&info.reference(), cancel)?
            .digest
    } else {
        candidate.to_owned()
    };

    if digest.is_empty() {
        return Err(VerifierError::Verification(format!(
            "empty digest for {}",
            info.reference()
        )));
    }

    let patch = digest_patch(info, &digest);
    tracing::debug!(image = %info.reference(), patch = %patch, "adding digest patch");
    info.digest = digest;
    Ok(Some(patch))
}
