//! Image references and their location inside a resource.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Registry assumed when a reference carries none.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Repository prefix for official images (`nginx` → `library/nginx`).
const OFFICIAL_REPO_PREFIX: &str = "library";

/// One occurrence of an image reference inside a resource.
///
/// `pointer` is the RFC-6901 JSON Pointer locating the reference string,
/// so a patch can address it directly. Only the digest mutator updates
/// `digest`; everything else treats the info as immutable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageInfo {
    /// Registry host (e.g. `ghcr.io`, `docker.io`).
    pub registry: String,

    /// Last path segment (e.g. `nginx` for `library/nginx`).
    pub name: String,

    /// Repository path (e.g. `library/nginx`).
    pub path: String,

    /// Tag, when present.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tag: String,

    /// Digest, when present (`sha256:…`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub digest: String,

    /// RFC-6901 JSON Pointer to the reference string in the resource.
    pub pointer: String,
}

impl ImageInfo {
    /// Parse an image reference string found at `pointer`.
    ///
    /// Accepts `[registry/]path[:tag][@digest]`; a missing registry
    /// defaults to `docker.io`, a bare name gets the `library/` prefix,
    /// and a reference with neither tag nor digest gets `latest`.
    pub fn parse(image: &str, pointer: &str) -> Result<Self, EngineError> {
        let invalid = |reason: &str| EngineError::InvalidImage {
            image: image.to_owned(),
            reason: reason.to_owned(),
        };

        if image.trim().is_empty() {
            return Err(invalid("empty reference"));
        }

        let (remainder, digest) = match image.split_once('@') {
            Some((_, d)) if d.is_empty() => return Err(invalid("empty digest")),
            Some((r, d)) => (r, d.to_owned()),
            None => (image, String::new()),
        };

        // A ':' after the last '/' separates the tag; earlier colons
        // belong to a registry port.
        let (repo, tag) = match remainder.rfind(':') {
            Some(idx) if idx > remainder.rfind('/').unwrap_or(0) => {
                let (r, t) = remainder.split_at(idx);
                (r, t[1..].to_owned())
            }
            _ => (remainder, String::new()),
        };

        if repo.is_empty() {
            return Err(invalid("empty repository"));
        }

        // The first segment is a registry only if it looks like a host.
        let (registry, mut path) = match repo.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_owned(), rest.to_owned())
            }
            _ => (DEFAULT_REGISTRY.to_owned(), repo.to_owned()),
        };

        if path.is_empty() {
            return Err(invalid("empty repository path"));
        }
        if registry == DEFAULT_REGISTRY && !path.contains('/') {
            path = format!("{OFFICIAL_REPO_PREFIX}/{path}");
        }

        let name = path.rsplit('/').next().unwrap_or(&path).to_owned();

        let tag = if tag.is_empty() && digest.is_empty() {
            "latest".to_owned()
        } else {
            tag
        };

        Ok(Self {
            registry,
            name,
            path,
            tag,
            digest,
            pointer: pointer.to_owned(),
        })
    }

    /// Reconstruct the full reference: `registry/path:tag[@digest]`.
    #[must_use]
    pub fn reference(&self) -> String {
        let mut out = self.reference_with_tag();
        if !self.digest.is_empty() {
            out.push('@');
            out.push_str(&self.digest);
        }
        out
    }

    /// The reference without any digest: `registry/path[:tag]`.
    #[must_use]
    pub fn reference_with_tag(&self) -> String {
        let mut out = format!("{}/{}", self.registry, self.path);
        if !self.tag.is_empty() {
            out.push(':');
            out.push_str(&self.tag);
        }
        out
    }
}

impl std::fmt::Display for ImageInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reference())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_reference() {
        let info = ImageInfo::parse("ghcr.io/org/app:v1.2", "/spec/containers/0/image").unwrap();
        assert_eq!(info.registry, "ghcr.io");
        assert_eq!(info.path, "org/app");
        assert_eq!(info.name, "app");
        assert_eq!(info.tag, "v1.2");
        assert!(info.digest.is_empty());
        assert_eq!(info.reference(), "ghcr.io/org/app:v1.2");
    }

    #[test]
    fn parse_bare_name_gets_defaults() {
        let info = ImageInfo::parse("nginx", "/spec/containers/0/image").unwrap();
        assert_eq!(info.registry, "docker.io");
        assert_eq!(info.path, "library/nginx");
        assert_eq!(info.tag, "latest");
        assert_eq!(info.reference(), "docker.io/library/nginx:latest");
    }

    #[test]
    fn parse_digest_reference() {
        let info = ImageInfo::parse(
            "gcr.io/foo/bar:v1@sha256:4d81f5ab6e2e2f21068652e4e5e6a26cbd0f11e1b7b4a1a414c3b4c4e7b0e2aa",
            "/spec/containers/0/image",
        )
        .unwrap();
        assert_eq!(info.tag, "v1");
        assert!(info.digest.starts_with("sha256:"));
        assert!(info.reference().ends_with(&info.digest));
        assert_eq!(info.reference_with_tag(), "gcr.io/foo/bar:v1");
    }

    #[test]
    fn parse_registry_with_port() {
        let info = ImageInfo::parse("localhost:5000/app:dev", "/p").unwrap();
        assert_eq!(info.registry, "localhost:5000");
        assert_eq!(info.path, "app");
        assert_eq!(info.tag, "dev");
    }

    #[test]
    fn parse_digest_only_reference_has_no_tag() {
        let info = ImageInfo::parse("ghcr.io/org/app@sha256:abcd", "/p").unwrap();
        assert!(info.tag.is_empty());
        assert_eq!(info.reference(), "ghcr.io/org/app@sha256:abcd");
    }

    #[test]
    fn parse_rejects_empty() {
        assert!(ImageInfo::parse("", "/p").is_err());
        assert!(ImageInfo::parse("ghcr.io/app@", "/p").is_err());
    }
}
