//! Per-admission image verification metadata.
//!
//! The engine records which images it verified; a downstream stage
//! serializes the map into the [`VERIFY_IMAGES_ANNOTATION`] annotation on
//! the resource, and the engine reads that annotation back on later
//! admissions to skip re-verification of unchanged images.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::EngineError;

/// Annotation carrying the serialized verification map.
pub const VERIFY_IMAGES_ANNOTATION: &str = "custodia.io/verify-images";

/// Map of image reference to verification outcome, accumulated across one
/// admission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageVerificationMetadata {
    data: BTreeMap<String, bool>,
}

impl ImageVerificationMetadata {
    /// Record an image's verification outcome.
    pub fn add(&mut self, image: &str, verified: bool) {
        self.data.insert(image.to_owned(), verified);
    }

    /// Whether an image was recorded as verified.
    #[must_use]
    pub fn is_verified(&self, image: &str) -> bool {
        self.data.get(image).copied().unwrap_or(false)
    }

    /// Whether anything was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Serialize to the annotation value format.
    pub fn to_annotation_value(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string(&self.data)?)
    }

    /// Parse an annotation value back into a metadata map.
    pub fn from_annotation_value(value: &str) -> Result<Self, EngineError> {
        Ok(Self {
            data: serde_json::from_str(value)?,
        })
    }
}

/// Read the verify-images annotation from a resource, if present.
#[must_use]
pub(crate) fn verify_annotation(resource: &Value) -> Option<&str> {
    resource
        .get("metadata")?
        .get("annotations")?
        .get(VERIFY_IMAGES_ANNOTATION)?
        .as_str()
}

/// Whether the resource's annotation already records this image as
/// verified. Unparseable annotations count as not verified.
#[must_use]
pub(crate) fn image_verified_in(resource: &Value, image: &str) -> bool {
    let Some(annotation) = verify_annotation(resource) else {
        return false;
    };
    match ImageVerificationMetadata::from_annotation_value(annotation) {
        Ok(metadata) => metadata.is_verified(image),
        Err(err) => {
            tracing::debug!(error = %err, "ignoring unparseable verify-images annotation");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trip_through_annotation_value() {
        let mut metadata = ImageVerificationMetadata::default();
        metadata.add("ghcr.io/org/app:v1", true);
        metadata.add("ghcr.io/org/proxy:v2", false);

        let value = metadata.to_annotation_value().unwrap();
        let parsed = ImageVerificationMetadata::from_annotation_value(&value).unwrap();
        assert_eq!(parsed, metadata);
        assert!(parsed.is_verified("ghcr.io/org/app:v1"));
        assert!(!parsed.is_verified("ghcr.io/org/proxy:v2"));
        assert!(!parsed.is_verified("ghcr.io/absent:v0"));
    }

    #[test]
    fn reads_annotation_from_resource() {
        let resource = json!({
            "metadata": {
                "annotations": {
                    VERIFY_IMAGES_ANNOTATION: r#"{"ghcr.io/org/app:v1":true}"#
                }
            }
        });
        assert!(image_verified_in(&resource, "ghcr.io/org/app:v1"));
        assert!(!image_verified_in(&resource, "ghcr.io/org/other:v1"));
        assert!(!image_verified_in(&json!({}), "ghcr.io/org/app:v1"));
    }

    #[test]
    fn garbage_annotation_counts_as_unverified() {
        let resource = json!({
            "metadata": { "annotations": { VERIFY_IMAGES_ANNOTATION: "not json" } }
        });
        assert!(!image_verified_in(&resource, "ghcr.io/org/app:v1"));
    }
}
