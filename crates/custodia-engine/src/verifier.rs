//! The pluggable signature verifier seam.
//!
//! The engine orchestrates cosign-style verification but never touches
//! cryptography or registry transports itself: a [`SignatureVerifier`]
//! implementation does both. The error type distinguishes network
//! failures from verification failures so the rule driver can report
//! registry unavailability as `Error` rather than a policy `Fail`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Options for one verifier call, built from an attestor and its
/// surrounding clause.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerifierOptions {
    /// The image reference to verify.
    pub image_ref: String,

    /// Verification key: inline PEM, `k8s://<ns>/<name>`, or a KMS URI.
    pub key: String,

    /// PEM-encoded signing certificate.
    pub cert: String,

    /// PEM-encoded certificate chain.
    pub cert_chain: String,

    /// PEM-encoded trust roots.
    pub roots: String,

    /// Expected OIDC issuer (keyless).
    pub issuer: String,

    /// Expected OIDC subject (keyless).
    pub subject: String,

    /// Additional certificate extensions that must match (keyless).
    pub additional_extensions: Option<BTreeMap<String, String>>,

    /// Required signature annotations.
    pub annotations: Option<BTreeMap<String, String>>,

    /// Repository holding signatures, when not colocated with the image.
    pub repository: String,

    /// Rekor transparency log URL.
    pub rekor_url: String,

    /// Signature algorithm override.
    pub signature_algorithm: String,

    /// Predicate type to select when fetching attestations.
    pub predicate_type: String,

    /// Fetch in-toto attestations instead of plain signatures.
    pub fetch_attestations: bool,
}

/// Result of a verifier call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerifierResponse {
    /// Digest of the verified image, when the verifier resolved one.
    pub digest: String,

    /// Decoded in-toto statements (attestation fetches only).
    pub statements: Vec<Statement>,
}

/// A decoded in-toto statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    /// Statement envelope type URI.
    #[serde(rename = "_type", default, skip_serializing_if = "String::is_empty")]
    pub statement_type: String,

    /// Subjects the statement covers.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub subject: serde_json::Value,

    /// Predicate schema URI.
    #[serde(rename = "predicateType")]
    pub predicate_type: String,

    /// The typed predicate body.
    #[serde(default)]
    pub predicate: serde_json::Value,
}

/// An image descriptor fetched from the registry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Descriptor {
    /// The manifest digest (`sha256:…`).
    pub digest: String,
}

/// Errors from a signature verifier.
///
/// `Network` is the sentinel the rule driver inspects to classify registry
/// or transparency-log unavailability; wrapping with [`VerifierError::wrap`]
/// preserves it through breadcrumb contexts.
#[derive(Debug, thiserror::Error)]
pub enum VerifierError {
    /// Transport failure reaching the registry or Rekor.
    #[error("network operation failed: {0}")]
    Network(String),

    /// The admission deadline expired or the request was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Signatures or attestations did not verify.
    #[error("{0}")]
    Verification(String),

    /// An error with a breadcrumb context prepended.
    #[error("{context}: {source}")]
    Context {
        /// The breadcrumb (attestor path or operation).
        context: String,
        /// The underlying error.
        source: Box<VerifierError>,
    },

    /// Several entry errors combined from a threshold set.
    #[error("{0}")]
    Aggregate(AggregateError),
}

impl VerifierError {
    /// Prepend a breadcrumb context.
    #[must_use]
    pub fn wrap(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Combine entry errors; a single error stays unwrapped.
    #[must_use]
    pub fn combine(mut errors: Vec<VerifierError>) -> Self {
        if errors.len() == 1 {
            errors.remove(0)
        } else {
            Self::Aggregate(AggregateError(errors))
        }
    }

    /// Whether this error (or any error it wraps) is a network failure.
    #[must_use]
    pub fn is_network(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Context { source, .. } => source.is_network(),
            Self::Aggregate(AggregateError(errors)) => errors.iter().any(Self::is_network),
            Self::Cancelled | Self::Verification(_) => false,
        }
    }

    /// Whether this error (or any error it wraps) is a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Context { source, .. } => source.is_cancelled(),
            Self::Aggregate(AggregateError(errors)) => errors.iter().any(Self::is_cancelled),
            Self::Network(_) | Self::Verification(_) => false,
        }
    }
}

/// A list of entry errors, displayed separated by `; `.
#[derive(Debug, Default)]
pub struct AggregateError(pub Vec<VerifierError>);

impl std::fmt::Display for AggregateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (index, error) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

/// Cosign-style signature and attestation verification.
///
/// Implementations own the registry transport, credential cache, and
/// cryptographic verification, and must be safe for concurrent use from
/// many admission threads. Every method may block on network I/O and
/// must return promptly with [`VerifierError::Cancelled`] once the token
/// fires.
pub trait SignatureVerifier: Send + Sync {
    /// Verify the image's signature against the given options.
    fn verify_signature(
        &self,
        opts: &VerifierOptions,
        cancel: &crate::context::CancelToken,
    ) -> Result<VerifierResponse, VerifierError>;

    /// Fetch and verify in-toto attestations for the image.
    fn fetch_attestations(
        &self,
        opts: &VerifierOptions,
        cancel: &crate::context::CancelToken,
    ) -> Result<VerifierResponse, VerifierError>;

    /// Fetch the image's manifest descriptor from the registry.
    fn fetch_image_descriptor(
        &self,
        image_ref: &str,
        cancel: &crate::context::CancelToken,
    ) -> Result<Descriptor, VerifierError>;
}
