//! Glob matching of image references against rule patterns.

use custodia_policy::rule::Rule;

use crate::extract::ExtractedImages;
use crate::image::ImageInfo;

/// Glob matching supporting `*` (any sequence) and `?` (one character).
/// `/` has no special meaning, so `ghcr.io/*` matches nested paths.
#[must_use]
pub fn matches_glob(text: &str, pattern: &str) -> bool {
    let t = text.as_bytes();
    let p = pattern.as_bytes();

    let mut text_idx = 0;
    let mut pat_idx = 0;
    let mut last_star: Option<usize> = None;
    let mut match_after_star = 0;

    while text_idx < t.len() {
        if pat_idx < p.len() && (p[pat_idx] == b'?' || p[pat_idx] == t[text_idx]) {
            text_idx += 1;
            pat_idx += 1;
        } else if pat_idx < p.len() && p[pat_idx] == b'*' {
            last_star = Some(pat_idx);
            match_after_star = text_idx;
            pat_idx += 1;
        } else if let Some(star) = last_star {
            pat_idx = star + 1;
            match_after_star += 1;
            text_idx = match_after_star;
        } else {
            return false;
        }
    }

    while pat_idx < p.len() && p[pat_idx] == b'*' {
        pat_idx += 1;
    }
    pat_idx == p.len()
}

/// Whether a reference matches any of the patterns.
#[must_use]
pub fn image_matches(image: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| matches_glob(image, pattern))
}

/// Select extracted images matching any pattern of the rule's clauses.
///
/// Returns the matches in extraction order plus the comma-joined pattern
/// list for diagnostics.
#[must_use]
pub fn matching_images(images: &ExtractedImages, rule: &Rule) -> (Vec<ImageInfo>, String) {
    let mut patterns: Vec<String> = Vec::new();
    for clause in &rule.verify_images {
        patterns.extend(clause.normalize().image_references);
    }

    let matched = images
        .iter()
        .filter(|named| image_matches(&named.info.reference(), &patterns))
        .map(|named| named.info.clone())
        .collect();

    (matched, patterns.join(","))
}
