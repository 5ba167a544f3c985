//! Image reference normalization.
//!
//! Base images are recorded in their canonical, fully qualified form so
//! that `foo`, `foo:latest` and `docker.io/library/foo:latest` all name
//! the same reference.

use dockersource_core::error::{Result, WrapperError};

/// Default registry when none is specified.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Aliases that all mean Docker Hub.
const DOCKER_HUB_ALIASES: &[&str] = &["docker.io", "index.docker.io", "registry-1.docker.io"];

/// Default tag when neither tag nor digest is given.
const DEFAULT_TAG: &str = "latest";

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry hostname (e.g., "ghcr.io", "docker.io")
    pub registry: String,
    /// Repository path (e.g., "library/nginx")
    pub repository: String,
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// - `nginx` → docker.io/library/nginx:latest
    /// - `docker.io/nginx:1.25` → docker.io/library/nginx:1.25
    /// - `localhost:5000/app` → localhost:5000/app:latest
    /// - `ghcr.io/org/image@sha256:abc...` → unchanged, no default tag
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(invalid(reference, "empty image reference"));
        }

        let (name_tag, digest) = match reference.split_once('@') {
            Some((name_tag, digest)) => {
                if !digest.contains(':') {
                    return Err(invalid(reference, "expected digest of the form algorithm:hex"));
                }
                (name_tag, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // A tag colon can only appear after the last slash; anything
        // before it is a registry port.
        let last_segment = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
        let (name, tag) = match name_tag[last_segment..].rfind(':') {
            Some(colon) => {
                let colon = last_segment + colon;
                (&name_tag[..colon], Some(name_tag[colon + 1..].to_string()))
            }
            None => (name_tag, None),
        };
        if tag.as_deref() == Some("") {
            return Err(invalid(reference, "empty tag"));
        }

        let (registry, repository) = split_registry_repository(name)
            .ok_or_else(|| invalid(reference, "empty repository"))?;

        let tag = match (&tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            _ => tag,
        };

        Ok(ImageReference {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Canonical string form of `reference`.
    pub fn canonicalize(reference: &str) -> Result<String> {
        Ok(Self::parse(reference)?.full_reference())
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = format!("{}/{}", self.registry, self.repository);
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

/// Split a name into registry and repository, applying Docker Hub defaults.
fn split_registry_repository(name: &str) -> Option<(String, String)> {
    let (registry, repository) = match name.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            (first.to_string(), rest.to_string())
        }
        _ => (DEFAULT_REGISTRY.to_string(), name.to_string()),
    };

    if repository.is_empty() {
        return None;
    }

    if DOCKER_HUB_ALIASES.contains(&registry.as_str()) {
        let repository = if repository.contains('/') {
            repository
        } else {
            format!("library/{}", repository)
        };
        return Some((DEFAULT_REGISTRY.to_string(), repository));
    }

    Some((registry, repository))
}

fn invalid(reference: &str, reason: &str) -> WrapperError {
    WrapperError::FrontendError(format!(
        "invalid image reference '{}': {}",
        reference, reason
    ))
}
