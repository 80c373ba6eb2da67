//! Registry image reference parsing.
//!
//! Parses references like `registry.example.com:5000/sandbox/fedora:40` into
//! their components.

use sandbox_image_core::error::{Result, TemplateError};

/// Registry used when the reference names none.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Tag used when the reference names neither tag nor digest.
const DEFAULT_TAG: &str = "latest";

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry host, optionally with port (e.g., "docker.io", "localhost:5000")
    pub registry: String,
    /// Repository path (e.g., "library/fedora")
    pub repository: String,
    /// Tag (e.g., "latest", "40")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse a reference string.
    ///
    /// - `fedora` → docker.io/library/fedora:latest
    /// - `fedora:40` → docker.io/library/fedora:40
    /// - `sandbox/fedora` → docker.io/sandbox/fedora:latest
    /// - `registry.example.com/sandbox/fedora:40`
    /// - `registry.example.com/sandbox/fedora@sha256:abc...`
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(TemplateError::ConfigError(
                "Empty image reference".to_string(),
            ));
        }

        let (name_tag, digest) = match reference.rsplit_once('@') {
            Some((name_tag, digest)) => {
                if !digest.contains(':') {
                    return Err(TemplateError::ConfigError(format!(
                        "Invalid digest format in reference '{}': expected algorithm:hex",
                        reference
                    )));
                }
                (name_tag, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        let (name, tag) = split_tag(name_tag);
        let (registry, repository) = split_registry_repository(name)?;

        let tag = match (tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (tag, _) => tag.map(str::to_string),
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Replace the registry, accepting URLs like `https://registry.example.com/`.
    pub fn with_registry(mut self, registry: &str) -> Self {
        let host = registry
            .trim()
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/');
        if !host.is_empty() {
            self.registry = host.to_string();
        }
        self
    }

    /// Full reference string.
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

/// Split `name[:tag]`, where a tag can only follow the last `/`.
fn split_tag(name_tag: &str) -> (&str, Option<&str>) {
    let last_segment_start = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
    match name_tag[last_segment_start..].rfind(':') {
        Some(colon) => {
            let split = last_segment_start + colon;
            (&name_tag[..split], Some(&name_tag[split + 1..]))
        }
        None => (name_tag, None),
    }
}

/// Split a name into registry and repository.
///
/// The first component is a registry when it contains a dot or a colon, or
/// is `localhost`.
fn split_registry_repository(name: &str) -> Result<(String, String)> {
    if let Some((first, repo)) = name.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            if repo.is_empty() {
                return Err(TemplateError::ConfigError(format!(
                    "Empty repository in reference '{}'",
                    name
                )));
            }
            return Ok((first.to_string(), repo.to_string()));
        }
    }

    let repository = if name.contains('/') {
        name.to_string()
    } else {
        format!("library/{}", name)
    };

    Ok((DEFAULT_REGISTRY.to_string(), repository))
}
