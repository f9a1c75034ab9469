//! Feature reference parsing
//!
//! A feature key in devcontainer.json names one of three sources:
//!
//! - **OCI registry**: `ghcr.io/devcontainers/features/node:18` or
//!   `registry/repo@sha256:<digest>` (tag defaults to `latest`)
//! - **HTTPS/HTTP URL**: a direct link to a feature tarball
//! - **Local path**: a relative path starting with `.`, resolved inside the
//!   workspace's `.devcontainer` directory

use crate::errors::{FeatureError, GodevError, Result};

/// A parsed feature reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureReference {
    /// Relative path inside `.devcontainer`
    Local { id: String, path: String },
    /// Direct tarball URL
    Http { id: String, url: String },
    /// OCI registry artifact
    Oci {
        id: String,
        registry: String,
        repository: String,
        /// Tag or `@`-digest; defaults to `latest`
        reference: String,
    },
}

impl FeatureReference {
    /// The raw identifier as written in the configuration.
    pub fn id(&self) -> &str {
        match self {
            FeatureReference::Local { id, .. } => id,
            FeatureReference::Http { id, .. } => id,
            FeatureReference::Oci { id, .. } => id,
        }
    }

    /// Stable source label used in dependency keys.
    pub fn source(&self) -> &'static str {
        match self {
            FeatureReference::Local { .. } => "local",
            FeatureReference::Http { .. } => "http",
            FeatureReference::Oci { .. } => "oci",
        }
    }
}

/// Lowercase and trim a feature identifier for matching purposes.
pub fn normalize_feature_id(id: &str) -> String {
    id.trim().to_lowercase()
}

/// Parse a feature reference string.
pub fn parse_feature_reference(id: &str) -> Result<FeatureReference> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(reference_error("feature id cannot be empty".to_string()));
    }
    let normalized = normalize_feature_id(trimmed);
    if normalized.starts_with("http://") || normalized.starts_with("https://") {
        return Ok(FeatureReference::Http {
            id: trimmed.to_string(),
            url: trimmed.to_string(),
        });
    }
    if trimmed.starts_with('.') {
        return Ok(FeatureReference::Local {
            id: trimmed.to_string(),
            path: trimmed.to_string(),
        });
    }
    let (registry, repository, reference) = parse_oci_reference(trimmed)?;
    Ok(FeatureReference::Oci {
        id: trimmed.to_string(),
        registry,
        repository,
        reference,
    })
}

fn parse_oci_reference(id: &str) -> Result<(String, String, String)> {
    let parts: Vec<&str> = id.split('/').collect();
    if parts.len() < 2 {
        return Err(reference_error(format!("invalid OCI feature reference: {}", id)));
    }
    let registry = parts[0].to_string();
    let mut repo_parts: Vec<String> = parts[1..].iter().map(|s| s.to_string()).collect();
    let repo = repo_parts.join("/");

    if let Some((repo, digest)) = repo.split_once('@') {
        return Ok((registry, repo.to_string(), digest.to_string()));
    }

    let last = repo_parts
        .last()
        .cloned()
        .unwrap_or_default();
    if let Some(idx) = last.rfind(':') {
        let tag = &last[idx + 1..];
        if tag.is_empty() {
            return Err(reference_error(format!("invalid OCI feature tag: {}", id)));
        }
        let name = last[..idx].to_string();
        let tag = tag.to_string();
        if let Some(slot) = repo_parts.last_mut() {
            *slot = name;
        }
        return Ok((registry, repo_parts.join("/"), tag));
    }

    Ok((registry, repo, "latest".to_string()))
}

fn reference_error(message: String) -> GodevError {
    GodevError::Feature(FeatureError::Reference { message })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_oci_with_tag() {
        let parsed = parse_feature_reference("ghcr.io/devcontainers/features/node:18").unwrap();
        assert_eq!(
            parsed,
            FeatureReference::Oci {
                id: "ghcr.io/devcontainers/features/node:18".into(),
                registry: "ghcr.io".into(),
                repository: "devcontainers/features/node".into(),
                reference: "18".into(),
            }
        );
    }

    #[test]
    fn test_parse_oci_defaults_to_latest() {
        let parsed = parse_feature_reference("ghcr.io/acme/tools").unwrap();
        match parsed {
            FeatureReference::Oci { reference, .. } => assert_eq!(reference, "latest"),
            other => panic!("expected OCI reference, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_oci_with_digest() {
        let parsed = parse_feature_reference("ghcr.io/acme/tools@sha256:abcd").unwrap();
        match parsed {
            FeatureReference::Oci {
                repository,
                reference,
                ..
            } => {
                assert_eq!(repository, "acme/tools");
                assert_eq!(reference, "sha256:abcd");
            }
            other => panic!("expected OCI reference, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_local() {
        let parsed = parse_feature_reference("./local-tooling").unwrap();
        assert_eq!(
            parsed,
            FeatureReference::Local {
                id: "./local-tooling".into(),
                path: "./local-tooling".into(),
            }
        );
        assert_eq!(parsed.source(), "local");
    }

    #[test]
    fn test_parse_http() {
        let parsed = parse_feature_reference("https://example.com/feature.tgz").unwrap();
        assert_eq!(parsed.source(), "http");
    }

    #[test]
    fn test_invalid_references() {
        assert!(parse_feature_reference("").is_err());
        assert!(parse_feature_reference("   ").is_err());
        assert!(parse_feature_reference("single-segment").is_err());
        assert!(parse_feature_reference("ghcr.io/acme/tools:").is_err());
    }

    #[test]
    fn test_normalize_feature_id() {
        assert_eq!(normalize_feature_id("  GHCR.io/Acme/Tools "), "ghcr.io/acme/tools");
    }
}
