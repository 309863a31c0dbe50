//! Policy data model for custodia image verification.
//!
//! `custodia-policy` defines the declarative policy surface: rules with
//! image-verification clauses, attestor sets with threshold counts, in-toto
//! attestation requirements, and any/all condition blocks. Types here are
//! pure serde data — evaluation lives in `custodia-engine`.

pub mod attestation;
pub mod attestor;
pub mod context;
pub mod error;
pub mod extractor;
pub mod rule;
pub mod verify;

pub use attestation::{AnyAllConditions, Attestation, Condition, ConditionOperator};
pub use attestor::{Attestor, AttestorSet, CertificateAttestor, KeyAttestor, KeylessAttestor};
pub use error::PolicyError;
pub use rule::{ApplyRules, Policy, Rule, RuleMatch};
pub use verify::VerifyImages;
