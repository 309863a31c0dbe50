//! Policies and rules.

use serde::{Deserialize, Serialize};

use crate::context::ContextEntry;
use crate::error::PolicyError;
use crate::extractor::ImageExtractorConfigs;
use crate::verify::VerifyImages;

/// A supply-chain policy: a named list of rules plus the application mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Policy name, echoed in responses and logs.
    pub name: String,

    /// Whether all matching rules apply, or only the first that applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply_rules: Option<ApplyRules>,

    /// Rules in declared order.
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl Policy {
    /// Parse a policy from JSON text.
    pub fn from_json(data: &str) -> Result<Self, PolicyError> {
        serde_json::from_str(data).map_err(PolicyError::from)
    }

    /// The effective application mode (`All` when unspecified).
    #[must_use]
    pub fn apply_rules(&self) -> ApplyRules {
        self.apply_rules.unwrap_or(ApplyRules::All)
    }

    /// Check structural soundness: rule names are unique and non-empty,
    /// verification clauses declare image references, and attestor
    /// entries declare at most one identity.
    pub fn validate(&self) -> Result<(), PolicyError> {
        let mut seen = std::collections::BTreeSet::new();
        for rule in &self.rules {
            if rule.name.is_empty() {
                return Err(PolicyError::InvalidRule {
                    rule: String::new(),
                    reason: "rule has no name".to_owned(),
                });
            }
            if !seen.insert(rule.name.as_str()) {
                return Err(PolicyError::InvalidRule {
                    rule: rule.name.clone(),
                    reason: "duplicate rule name".to_owned(),
                });
            }
            rule.validate()?;
        }
        Ok(())
    }
}

/// Rule application mode across a policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyRules {
    /// Every matching rule is evaluated.
    #[default]
    All,
    /// Evaluation stops after the first rule that applies.
    One,
}

/// A single policy rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Rule name, echoed in responses and logs.
    pub name: String,

    /// Which resources this rule applies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_resources: Option<RuleMatch>,

    /// External data to load before variable substitution.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<ContextEntry>,

    /// Custom image extractors, keyed by resource kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_extractors: Option<ImageExtractorConfigs>,

    /// Image verification clauses.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verify_images: Vec<VerifyImages>,
}

impl Rule {
    /// Check this rule's verification clauses and attestor trees.
    pub fn validate(&self) -> Result<(), PolicyError> {
        for (index, clause) in self.verify_images.iter().enumerate() {
            let clause = clause.normalize();
            if clause.image_references.is_empty() {
                return Err(PolicyError::InvalidRule {
                    rule: self.name.clone(),
                    reason: format!("verifyImages[{index}] declares no image references"),
                });
            }
            for (j, set) in clause.attestors.iter().enumerate() {
                validate_attestor_set(set, &format!(".attestors[{j}]"))?;
            }
            for (a, attestation) in clause.attestations.iter().enumerate() {
                for (j, set) in attestation.attestors.iter().enumerate() {
                    validate_attestor_set(
                        set,
                        &format!(".attestations[{a}].attestors[{j}]"),
                    )?;
                }
            }
        }
        Ok(())
    }
}

fn validate_attestor_set(
    set: &crate::attestor::AttestorSet,
    path: &str,
) -> Result<(), PolicyError> {
    for (index, entry) in set.entries.iter().enumerate() {
        let identities = usize::from(entry.attestor.is_some())
            + usize::from(entry.keys.is_some())
            + usize::from(entry.certificates.is_some())
            + usize::from(entry.keyless.is_some());
        if identities > 1 {
            return Err(PolicyError::InvalidAttestor {
                path: format!("{path}.entries[{index}]"),
                reason: "entry declares more than one identity kind".to_owned(),
            });
        }
        if let Some(nested) = &entry.attestor {
            validate_attestor_set(nested, &format!("{path}.entries[{index}].attestor"))?;
        }
    }
    Ok(())
}

/// Resource selectors for a rule. Kinds and names support `*`/`?` globs;
/// an empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleMatch {
    /// Resource kinds (e.g. `Pod`, `apps/v1/Deployment`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<String>,

    /// Resource name patterns.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<String>,

    /// Namespace patterns.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
}
