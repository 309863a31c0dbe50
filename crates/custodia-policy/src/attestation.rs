//! Attestation requirements and condition blocks.
//!
//! An [`Attestation`] names an in-toto predicate type, the attestor sets
//! whose signatures cover it, and declarative conditions evaluated over
//! each matching statement's `predicate` body.

use serde::{Deserialize, Serialize};

use crate::attestor::AttestorSet;

/// A required in-toto attestation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attestation {
    /// URI selecting statements whose `predicateType` matches.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub predicate_type: String,

    /// Attestor sets that must have signed the attestation. An empty list
    /// means "no signer constraint; accept any statement".
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attestors: Vec<AttestorSet>,

    /// Conditions evaluated against each selected statement.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<AnyAllConditions>,
}

/// A block of conditions with any/all semantics. A block passes when at
/// least one `any` condition holds (vacuously true if empty) and every
/// `all` condition holds. A list of blocks is conjunctive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnyAllConditions {
    /// At least one must hold.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub any: Vec<Condition>,

    /// Every one must hold.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub all: Vec<Condition>,
}

/// A single comparison between a key expression and a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Left-hand side; typically a `{{ … }}` expression substituted
    /// before evaluation.
    pub key: serde_json::Value,

    /// Comparison operator.
    pub operator: ConditionOperator,

    /// Right-hand side.
    #[serde(default)]
    pub value: serde_json::Value,
}

/// Comparison operators for conditions.
///
/// Scalars compare with JSON-like equality (numbers compare by value
/// across integer/float representations). Ordering operators require
/// numbers or numeric strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOperator {
    /// Left equals right.
    Equals,
    /// Left does not equal right.
    NotEquals,
    /// Left (scalar) is a member of right (list), or every element of
    /// left (list) is a member of right.
    In,
    /// Any element of left (list) is a member of right (list).
    AnyIn,
    /// Every element of left (list) is a member of right (list).
    AllIn,
    /// Negation of `In`.
    NotIn,
    /// Left is numerically greater than right.
    GreaterThan,
    /// Left is numerically greater than or equal to right.
    GreaterThanOrEquals,
    /// Left is numerically less than right.
    LessThan,
    /// Left is numerically less than or equal to right.
    LessThanOrEquals,
}
