//! Image verification clauses.
//!
//! A [`VerifyImages`] clause declares which image references a rule covers,
//! the attestors expected to have signed them, required attestations, and
//! whether the matched image should be pinned by digest. Older policies
//! used flat single-signer fields (`image`, `key`, `issuer`/`subject`);
//! [`VerifyImages::normalize`] lifts those into the plural form so the
//! engine only ever sees one shape.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::attestation::Attestation;
use crate::attestor::{Attestor, AttestorSet, KeyAttestor, KeylessAttestor};

/// A single image verification clause within a rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyImages {
    /// Glob patterns selecting image references this clause applies to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_references: Vec<String>,

    /// Attestor sets that must verify the image signature.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attestors: Vec<AttestorSet>,

    /// Required in-toto attestations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attestations: Vec<Attestation>,

    /// Pin the matched image by digest on a passing verification.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub mutate_digest: bool,

    /// Repository holding signatures, when not colocated with the image.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub repository: String,

    /// PEM-encoded trust roots for certificate verification.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub roots: String,

    /// Required signature annotations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,

    // Legacy single-signer fields, lifted by `normalize`.
    /// Legacy: a single image reference pattern.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,

    /// Legacy: a single inline public key.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,

    /// Legacy: keyless OIDC issuer.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub issuer: String,

    /// Legacy: keyless OIDC subject.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subject: String,
}

impl VerifyImages {
    /// Lift legacy single-signer fields into the plural form.
    ///
    /// Returns a clause whose `image_references` and `attestors` carry any
    /// legacy `image`/`key`/`issuer`/`subject` content; the legacy fields
    /// are cleared. Already-normalized clauses come back unchanged.
    #[must_use]
    pub fn normalize(&self) -> Self {
        if self.image.is_empty()
            && self.key.is_empty()
            && self.issuer.is_empty()
            && self.subject.is_empty()
        {
            return self.clone();
        }

        let mut out = self.clone();

        if !out.image.is_empty() {
            out.image_references.push(std::mem::take(&mut out.image));
        }

        let mut entry = Attestor::default();
        if !out.key.is_empty() {
            entry.keys = Some(KeyAttestor {
                public_keys: std::mem::take(&mut out.key),
                ..KeyAttestor::default()
            });
        } else if !out.issuer.is_empty() || !out.subject.is_empty() {
            entry.keyless = Some(KeylessAttestor {
                issuer: std::mem::take(&mut out.issuer),
                subject: std::mem::take(&mut out.subject),
                roots: out.roots.clone(),
                ..KeylessAttestor::default()
            });
        }

        if entry.keys.is_some() || entry.keyless.is_some() {
            out.attestors.push(AttestorSet {
                count: None,
                entries: vec![entry],
            });
        }

        out
    }

    /// Whether this clause declares any signer or attestation requirement.
    #[must_use]
    pub fn has_verification(&self) -> bool {
        !self.attestors.is_empty() || !self.attestations.is_empty()
    }
}
