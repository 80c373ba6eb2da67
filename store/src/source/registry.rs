//! Container registry source.
//!
//! Uses the `oci-distribution` crate to read image manifests and layer blobs
//! from Docker Hub or any other OCI registry. Every filesystem layer of the
//! manifest becomes one template layer, followed by a payload-less layer
//! carrying the image configuration.

use std::path::Path;

use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::{ImageIndexEntry, OciDescriptor};
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference};
use oci_spec::image::ImageConfiguration;
use sandbox_image_core::error::{Result, TemplateError};
use tokio::io::AsyncWriteExt;

use super::reference::ImageReference;
use super::{oci, FetchRequest, LayerDescriptor, TemplateSource};
use crate::layer::LayerConfig;

/// Registry key of this source.
pub(crate) const SOURCE_NAME: &str = "docker";

/// Authentication credentials for a container registry.
#[derive(Clone)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Credentials from `REGISTRY_USERNAME` and `REGISTRY_PASSWORD`, or
    /// anonymous when either is unset.
    pub fn from_env() -> Self {
        let username = std::env::var("REGISTRY_USERNAME").ok();
        let password = std::env::var("REGISTRY_PASSWORD").ok();

        if username.is_some() && password.is_some() {
            Self { username, password }
        } else {
            Self::anonymous()
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

impl std::fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Template source backed by a container registry.
pub struct RegistrySource {
    client: Client,
}

impl RegistrySource {
    pub fn new() -> Self {
        let config = ClientConfig {
            protocol: ClientProtocol::Https,
            platform_resolver: Some(Box::new(linux_platform_resolver)),
            ..Default::default()
        };
        Self {
            client: Client::new(config),
        }
    }

    fn image_reference(request: &FetchRequest) -> Result<ImageReference> {
        let reference = ImageReference::parse(&request.reference)?;
        Ok(match &request.registry {
            Some(registry) => reference.with_registry(registry),
            None => reference,
        })
    }

    /// Convert an ImageReference to an oci-distribution Reference.
    fn to_oci_reference(reference: &ImageReference) -> Result<Reference> {
        let ref_str = reference.full_reference();
        ref_str.parse::<Reference>().map_err(|e| {
            TemplateError::ConfigError(format!("Invalid image reference '{}': {}", ref_str, e))
        })
    }

    fn unavailable(reference: &ImageReference, message: String) -> TemplateError {
        TemplateError::source_unavailable(
            SOURCE_NAME,
            format!("{}: {}", reference.registry, message),
        )
    }
}

impl Default for RegistrySource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TemplateSource for RegistrySource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch_template(&self, request: &FetchRequest) -> Result<Vec<LayerDescriptor>> {
        let reference = Self::image_reference(request)?;
        let oci_ref = Self::to_oci_reference(&reference)?;
        let auth = request.auth.to_oci_auth();

        tracing::info!(reference = %reference, "Reading image manifest");

        // Resolves multi-arch indexes to the current platform
        let (manifest, manifest_digest) = self
            .client
            .pull_image_manifest(&oci_ref, &auth)
            .await
            .map_err(|e| Self::unavailable(&reference, format!("Failed to pull manifest: {}", e)))?;

        let mut config_data: Vec<u8> = Vec::new();
        self.client
            .pull_blob(&oci_ref, &manifest.config, &mut config_data)
            .await
            .map_err(|e| {
                Self::unavailable(&reference, format!("Failed to pull config blob: {}", e))
            })?;
        let image: ImageConfiguration = oci::parse_image_config(&config_data).map_err(|e| {
            Self::unavailable(&reference, format!("Failed to parse image config: {}", e))
        })?;

        let mut layers = manifest
            .layers
            .iter()
            .map(|layer| {
                oci::payload_layer(
                    &layer.media_type,
                    &layer.digest,
                    layer.size,
                    layer.media_type.clone(),
                )
            })
            .collect::<Result<Vec<_>>>()?;
        layers.push(oci::config_layer(&manifest.config.digest, &image));

        tracing::debug!(
            reference = %reference,
            digest = %manifest_digest,
            layers = layers.len(),
            "Image manifest read"
        );

        Ok(layers)
    }

    async fn fetch_payload(
        &self,
        request: &FetchRequest,
        layer: &LayerDescriptor,
        dest: &Path,
    ) -> Result<()> {
        let reference = Self::image_reference(request)?;
        let oci_ref = Self::to_oci_reference(&reference)?;

        // The locator holds the media type recorded by fetch_template
        let descriptor = OciDescriptor {
            media_type: layer.locator.clone(),
            digest: layer.digest.clone(),
            size: layer
                .size
                .and_then(|s| i64::try_from(s).ok())
                .unwrap_or_default(),
            ..Default::default()
        };

        tracing::debug!(digest = %layer.digest, size = ?layer.size, "Pulling layer");

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| TemplateError::io(dest, e))?;
        self.client
            .pull_blob(&oci_ref, &descriptor, &mut file)
            .await
            .map_err(|e| {
                Self::unavailable(
                    &reference,
                    format!("Failed to pull layer {}: {}", layer.digest, e),
                )
            })?;
        file.flush().await.map_err(|e| TemplateError::io(dest, e))?;

        Ok(())
    }

    fn resolve_run_command(&self, config: &LayerConfig) -> Vec<String> {
        oci::run_command(config)
    }
}

/// Platform resolver that always selects linux images matching the host architecture.
///
/// Sandboxes run a Linux guest regardless of the host OS.
fn linux_platform_resolver(manifests: &[ImageIndexEntry]) -> Option<String> {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };

    manifests
        .iter()
        .find(|entry| {
            entry
                .platform
                .as_ref()
                .map_or(false, |p| p.os == "linux" && p.architecture == arch)
        })
        .map(|entry| entry.digest.clone())
}
