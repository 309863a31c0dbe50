//! Error types for the policy data model.

/// Errors from parsing or normalizing policy documents.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// Policy JSON failed to parse.
    #[error("failed to parse policy: {0}")]
    ParseError(#[from] serde_json::Error),

    /// A rule declares conflicting or incomplete clauses.
    #[error("invalid rule `{rule}`: {reason}")]
    InvalidRule {
        /// Name of the offending rule.
        rule: String,
        /// What is wrong with it.
        reason: String,
    },

    /// An attestor entry declares more than one identity kind.
    #[error("invalid attestor at {path}: {reason}")]
    InvalidAttestor {
        /// Breadcrumb path of the offending entry.
        path: String,
        /// What is wrong with it.
        reason: String,
    },
}
