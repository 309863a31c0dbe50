//! Engine responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of one rule against one image (or of the rule as a whole for
/// skip/error cases).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    /// Verification succeeded.
    Pass,
    /// Verification failed policy.
    Fail,
    /// The rule did not apply to the resource.
    Skip,
    /// The rule could not be evaluated (I/O, extraction, substitution).
    Error,
    /// Advisory outcome.
    Warn,
}

impl std::fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Skip => "skip",
            Self::Error => "error",
            Self::Warn => "warn",
        };
        f.write_str(text)
    }
}

/// The kind of rule that produced a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleType {
    /// Image signature/attestation verification.
    #[default]
    ImageVerify,
}

/// One rule's outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleResponse {
    /// The rule name.
    pub name: String,

    /// The kind of rule.
    #[serde(rename = "type")]
    pub rule_type: RuleType,

    /// Human-readable outcome.
    pub message: String,

    /// The outcome status.
    pub status: RuleStatus,

    /// RFC-6902 patches to apply to the resource.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<Value>,
}

impl RuleResponse {
    /// Build a response for an image-verify rule.
    #[must_use]
    pub fn new(name: &str, message: impl Into<String>, status: RuleStatus) -> Self {
        Self {
            name: name.to_owned(),
            rule_type: RuleType::ImageVerify,
            message: message.into(),
            status,
            patches: Vec::new(),
        }
    }
}

/// Aggregated outcome of one policy over one admission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyResponse {
    /// The policy name.
    pub policy: String,

    /// Rule responses, in evaluation order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<RuleResponse>,

    /// How many rules applied (pass or fail).
    pub rules_applied_count: usize,

    /// How many rules errored.
    pub rules_error_count: usize,
}

/// The engine's complete answer for one admission.
///
/// Always complete: even when every rule errors, the response carries one
/// entry per evaluated rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineResponse {
    /// Per-policy results.
    pub policy_response: PolicyResponse,

    /// When processing finished.
    pub timestamp: DateTime<Utc>,
}

impl EngineResponse {
    /// An empty response for a policy.
    #[must_use]
    pub fn new(policy: &str) -> Self {
        Self {
            policy_response: PolicyResponse {
                policy: policy.to_owned(),
                ..PolicyResponse::default()
            },
            timestamp: Utc::now(),
        }
    }

    /// Append a rule response, updating the counters.
    pub fn append(&mut self, response: RuleResponse) {
        match response.status {
            RuleStatus::Pass | RuleStatus::Fail => self.policy_response.rules_applied_count += 1,
            RuleStatus::Error => self.policy_response.rules_error_count += 1,
            RuleStatus::Skip | RuleStatus::Warn => {}
        }
        self.policy_response.rules.push(response);
    }

    /// Whether no rule failed or errored.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        !self
            .policy_response
            .rules
            .iter()
            .any(|rule| matches!(rule.status, RuleStatus::Fail | RuleStatus::Error))
    }

    /// All patches across rule responses, in evaluation order.
    #[must_use]
    pub fn patches(&self) -> Vec<&Value> {
        self.policy_response
            .rules
            .iter()
            .flat_map(|rule| rule.patches.iter())
            .collect()
    }
}
