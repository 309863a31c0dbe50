//! Error types for the verification engine.

/// Errors from the custodia verification engine.
///
/// These never escape the per-rule boundary: the rule driver converts each
/// into a rule response and moves on to the next rule.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// An image reference string could not be parsed.
    #[error("failed to parse image reference `{image}`: {reason}")]
    InvalidImage {
        /// The offending reference.
        image: String,
        /// Why it failed to parse.
        reason: String,
    },

    /// A JSON Pointer is malformed or names a missing field.
    #[error("no value at pointer `{0}`")]
    PointerNotFound(String),

    /// An image extractor failed to produce images.
    #[error("image extraction failed: {0}")]
    Extract(String),

    /// A `{{ … }}` expression did not resolve against the context.
    #[error("failed to resolve variable `{0}`")]
    UnresolvedVariable(String),

    /// A value could not be added to the evaluation context.
    #[error("failed to add object to context: {0}")]
    Context(String),

    /// Rule-scoped context loading failed.
    #[error("context loading failed: {0}")]
    LoadContext(String),

    /// A condition could not be evaluated.
    #[error("condition evaluation failed: {0}")]
    ConditionEval(String),

    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The admission deadline expired or the request was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}
