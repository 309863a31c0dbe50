//! Image extraction from unstructured resources.
//!
//! Produces a two-level mapping `group → name → ImageInfo`: the outer key
//! is the extractor group (`containers`, `initContainers`, …), the inner
//! key the element name, so callers can address one image. The default
//! walk finds Pod-shaped specs at any depth, which covers Pods as well as
//! the template wrappers of Deployments, StatefulSets, and CronJobs.
//! Rules may override the walk with their own extractor paths.

use serde_json::Value;

use custodia_policy::extractor::ImageExtractorConfigs;

use crate::error::EngineError;
use crate::image::ImageInfo;

/// Container list keys recognized by the default walk, in yield order.
const CONTAINER_GROUPS: [&str; 3] = ["containers", "initContainers", "ephemeralContainers"];

/// Group name used for custom extractors that don't declare one.
const CUSTOM_GROUP: &str = "custom";

/// Images extracted from one resource, grouped and ordered.
///
/// Groups and entries preserve traversal order so downstream rule
/// responses are deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedImages {
    groups: Vec<ImageGroup>,
}

/// One extractor group and its named images.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageGroup {
    /// Group name (e.g. `containers`).
    pub name: String,
    /// Images in resource order.
    pub images: Vec<NamedImage>,
}

/// An image addressed by its element name within a group.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedImage {
    /// Element name (the container `name` field, or a stringified index).
    pub name: String,
    /// The parsed image occurrence.
    pub info: ImageInfo,
}

impl ExtractedImages {
    /// All groups in traversal order.
    #[must_use]
    pub fn groups(&self) -> &[ImageGroup] {
        &self.groups
    }

    /// Look up a single image by group and element name.
    #[must_use]
    pub fn get(&self, group: &str, name: &str) -> Option<&ImageInfo> {
        self.groups
            .iter()
            .find(|g| g.name == group)?
            .images
            .iter()
            .find(|i| i.name == name)
            .map(|i| &i.info)
    }

    /// Iterate every image in traversal order.
    pub fn iter(&self) -> impl Iterator<Item = &NamedImage> {
        self.groups.iter().flat_map(|g| g.images.iter())
    }

    /// Whether no images were extracted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(|g| g.images.is_empty())
    }

    fn push(&mut self, group: &str, name: String, info: ImageInfo) {
        match self.groups.iter_mut().find(|g| g.name == group) {
            Some(g) => g.images.push(NamedImage { name, info }),
            None => self.groups.push(ImageGroup {
                name: group.to_owned(),
                images: vec![NamedImage { name, info }],
            }),
        }
    }
}

/// Extract images using the default Pod-shaped walk.
pub fn default_images(resource: &Value) -> Result<ExtractedImages, EngineError> {
    let mut out = ExtractedImages::default();
    walk_pod_specs(resource, "", &mut out)?;
    Ok(out)
}

/// Extract images using rule-declared extractor paths.
///
/// Extractors are grouped by resource kind; only the groups matching the
/// resource's `kind` apply. The inner name comes from a `name` field next
/// to the image string when present, else the element's index.
pub fn custom_images(
    resource: &Value,
    configs: &ImageExtractorConfigs,
) -> Result<ExtractedImages, EngineError> {
    let kind = resource
        .get("kind")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let Some(extractors) = configs.get(kind) else {
        return Err(EngineError::Extract(format!(
            "no extractors defined for kind `{kind}`"
        )));
    };

    let mut out = ExtractedImages::default();
    for extractor in extractors {
        let group = if extractor.name.is_empty() {
            CUSTOM_GROUP
        } else {
            &extractor.name
        };

        let mut matches = Vec::new();
        collect_path(resource, extractor.path.trim_matches('/'), "", &mut matches);
        if matches.is_empty() {
            return Err(EngineError::Extract(format!(
                "path `{}` matched nothing in the resource",
                extractor.path
            )));
        }

        for (index, (pointer, value)) in matches.into_iter().enumerate() {
            let Some(image) = value.as_str() else {
                return Err(EngineError::Extract(format!(
                    "value at `{pointer}` is not a string"
                )));
            };
            let name = adjacent_name(resource, &pointer)
                .unwrap_or_else(|| index.to_string());
            out.push(group, name, ImageInfo::parse(image, &pointer)?);
        }
    }

    Ok(out)
}

/// Recursively find `containers`/`initContainers`/`ephemeralContainers`
/// arrays and record their `image` fields.
fn walk_pod_specs(
    value: &Value,
    pointer: &str,
    out: &mut ExtractedImages,
) -> Result<(), EngineError> {
    let Some(map) = value.as_object() else {
        return Ok(());
    };

    for group in CONTAINER_GROUPS {
        let Some(containers) = map.get(group).and_then(Value::as_array) else {
            continue;
        };
        for (index, container) in containers.iter().enumerate() {
            let Some(image) = container.get("image").and_then(Value::as_str) else {
                continue;
            };
            let name = container
                .get("name")
                .and_then(Value::as_str)
                .map_or_else(|| index.to_string(), ToOwned::to_owned);
            let image_pointer = format!("{pointer}/{group}/{index}/image");
            out.push(group, name, ImageInfo::parse(image, &image_pointer)?);
        }
    }

    for (key, child) in map {
        if CONTAINER_GROUPS.contains(&key.as_str()) {
            continue;
        }
        if child.is_object() {
            walk_pod_specs(child, &format!("{pointer}/{}", escape_token(key)), out)?;
        }
    }

    Ok(())
}

/// Collect `(pointer, value)` pairs matching a slash-separated path where
/// `*` fans out over array elements.
fn collect_path<'a>(value: &'a Value, path: &str, pointer: &str, out: &mut Vec<(String, &'a Value)>) {
    let Some((head, rest)) = split_head(path) else {
        out.push((pointer.to_owned(), value));
        return;
    };

    match value {
        Value::Array(items) if head == "*" => {
            for (index, item) in items.iter().enumerate() {
                collect_path(item, rest, &format!("{pointer}/{index}"), out);
            }
        }
        Value::Array(items) => {
            if let Ok(index) = head.parse::<usize>() {
                if let Some(item) = items.get(index) {
                    collect_path(item, rest, &format!("{pointer}/{index}"), out);
                }
            }
        }
        Value::Object(map) => {
            if let Some(child) = map.get(head) {
                collect_path(child, rest, &format!("{pointer}/{}", escape_token(head)), out);
            }
        }
        _ => {}
    }
}

fn split_head(path: &str) -> Option<(&str, &str)> {
    if path.is_empty() {
        return None;
    }
    Some(match path.split_once('/') {
        Some((head, rest)) => (head, rest),
        None => (path, ""),
    })
}

/// Find a `name` field adjacent to the value at `pointer`.
fn adjacent_name(resource: &Value, pointer: &str) -> Option<String> {
    let parent = pointer.rsplit_once('/')?.0;
    resource
        .pointer(parent)?
        .get("name")?
        .as_str()
        .map(ToOwned::to_owned)
}

/// Escape a key for use as an RFC-6901 reference token.
fn escape_token(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}
