//! Attestor identities and threshold sets.
//!
//! An [`AttestorSet`] groups signer identities with an M-of-N threshold:
//! verification succeeds once `count` entries verify (all of them when
//! `count` is absent or zero). Entries may nest further sets, allowing
//! policies like "two of: team A's keys, or any one org certificate".

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A collection of attestors with a required-verified threshold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestorSet {
    /// Minimum number of entries that must verify. Absent or zero means
    /// every entry is required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,

    /// Signer identities, tried in declared order.
    #[serde(default)]
    pub entries: Vec<Attestor>,
}

impl AttestorSet {
    /// The number of entries that must verify for this set to pass.
    #[must_use]
    pub fn required_count(&self) -> usize {
        match self.count {
            Some(n) if n > 0 => n as usize,
            _ => self.entries.len(),
        }
    }
}

/// A single signer identity: a nested set, raw keys, certificates, or a
/// keyless (OIDC) identity. Exactly one of the identity fields is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attestor {
    /// A nested attestor set, evaluated recursively as one entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestor: Option<Box<AttestorSet>>,

    /// Raw public key identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<KeyAttestor>,

    /// X.509 certificate identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificates: Option<CertificateAttestor>,

    /// Keyless (OIDC issuer/subject) identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyless: Option<KeylessAttestor>,

    /// Overrides the clause-level signature repository for this entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    /// Required signature annotations for this entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

/// A raw public key attestor. The key may be inline PEM, a Kubernetes
/// secret reference, or a KMS URI — resolved in that order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyAttestor {
    /// One or more concatenated PEM public key blocks.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub public_keys: String,

    /// Kubernetes secret holding the key, rendered as `k8s://<ns>/<name>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretReference>,

    /// KMS provider URI.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kms: String,

    /// Signature algorithm (e.g. `sha256`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature_algorithm: String,

    /// Rekor transparency log settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rekor: Option<Rekor>,
}

/// Reference to a Kubernetes secret holding a verification key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    /// Secret namespace.
    pub namespace: String,
    /// Secret name.
    pub name: String,
}

/// Rekor transparency log configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rekor {
    /// Rekor server URL.
    pub url: String,
}

/// An X.509 certificate attestor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateAttestor {
    /// PEM-encoded signing certificate.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub certificate: String,

    /// PEM-encoded certificate chain.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub certificate_chain: String,

    /// Rekor transparency log settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rekor: Option<Rekor>,
}

/// A keyless attestor: an OIDC identity recorded in a Fulcio certificate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeylessAttestor {
    /// Expected OIDC issuer.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub issuer: String,

    /// Expected OIDC subject.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subject: String,

    /// PEM-encoded trust roots.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub roots: String,

    /// Additional certificate extensions that must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_extensions: Option<BTreeMap<String, String>>,

    /// Rekor transparency log settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rekor: Option<Rekor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_count_defaults_to_entry_count() {
        let set = AttestorSet {
            count: None,
            entries: vec![Attestor::default(), Attestor::default()],
        };
        assert_eq!(set.required_count(), 2);
    }

    #[test]
    fn required_count_zero_means_all() {
        let set = AttestorSet {
            count: Some(0),
            entries: vec![Attestor::default(), Attestor::default(), Attestor::default()],
        };
        assert_eq!(set.required_count(), 3);
    }

    #[test]
    fn required_count_explicit() {
        let set = AttestorSet {
            count: Some(2),
            entries: vec![Attestor::default(), Attestor::default(), Attestor::default()],
        };
        assert_eq!(set.required_count(), 2);
    }

    #[test]
    fn nested_attestor_round_trip() {
        let json = serde_json::json!({
            "count": 1,
            "entries": [
                { "attestor": { "entries": [ { "keys": { "publicKeys": "-----BEGIN PUBLIC KEY-----" } } ] } },
                { "keyless": { "issuer": "https://accounts.example.com", "subject": "build@example.com" } }
            ]
        });
        let set: AttestorSet = serde_json::from_value(json.clone()).unwrap();
        assert!(set.entries[0].attestor.is_some());
        assert!(set.entries[1].keyless.is_some());
        assert_eq!(serde_json::to_value(&set).unwrap(), json);
    }
}
