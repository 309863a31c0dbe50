//! User-supplied image extractor specs.
//!
//! By default the engine walks Pod-shaped specs for container images. A
//! rule may instead declare extractors: field paths into the resource,
//! grouped by resource kind, that locate image reference strings in
//! custom places (CRDs, sidecar wrappers).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Extractor specs keyed by resource kind (e.g. `Task`, `Deployment`).
pub type ImageExtractorConfigs = BTreeMap<String, Vec<ImageExtractor>>;

/// A single extractor: a path into the resource naming image fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageExtractor {
    /// Slash-separated path from the resource root; `*` traverses every
    /// element of an array (e.g. `/spec/steps/*/image`).
    pub path: String,

    /// Group name for the extracted images; defaults to `custom`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}
