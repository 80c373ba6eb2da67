//! Conversions shared by the OCI-backed sources.

use oci_spec::image::ImageConfiguration;
use sandbox_image_core::error::{Result, TemplateError};
use sandbox_image_core::EnvVar;

use super::LayerDescriptor;
use crate::layer::{LayerConfig, PayloadFormat};

/// Command used when an image declares neither entrypoint nor cmd.
pub(crate) const FALLBACK_COMMAND: &str = "/bin/sh";

/// Parse an image configuration blob.
///
/// `history` is optional in image configs but required by `oci-spec`, so a
/// missing one is filled in as empty.
pub(crate) fn parse_image_config(data: &[u8]) -> serde_json::Result<ImageConfiguration> {
    let mut value: serde_json::Value = serde_json::from_slice(data)?;
    if let Some(object) = value.as_object_mut() {
        object
            .entry("history")
            .or_insert_with(|| serde_json::Value::Array(Vec::new()));
    }
    serde_json::from_value(value)
}

/// Extract the runtime configuration of an image.
pub(crate) fn layer_config(image: &ImageConfiguration) -> LayerConfig {
    let Some(config) = image.config() else {
        return LayerConfig::default();
    };

    let env = config
        .env()
        .as_ref()
        .map(|vars| EnvVar::parse_lenient(vars.iter()))
        .unwrap_or_default();

    LayerConfig {
        env,
        volumes: config.volumes().clone().unwrap_or_default(),
        entrypoint: config.entrypoint().clone().unwrap_or_default(),
        cmd: config.cmd().clone().unwrap_or_default(),
        working_dir: config
            .working_dir()
            .clone()
            .filter(|dir| !dir.is_empty()),
    }
}

/// Descriptor for one filesystem layer of a manifest.
///
/// `locator` is whatever the source needs later to fetch the blob.
pub(crate) fn payload_layer(
    media_type: &str,
    digest: &str,
    size: i64,
    locator: String,
) -> Result<LayerDescriptor> {
    let payload = PayloadFormat::from_media_type(media_type).ok_or_else(|| {
        TemplateError::ConfigError(format!(
            "Unsupported layer media type '{}' for {}",
            media_type, digest
        ))
    })?;

    Ok(LayerDescriptor {
        digest: digest.to_string(),
        payload: Some(payload),
        size: u64::try_from(size).ok(),
        config: LayerConfig::default(),
        locator,
    })
}

/// Payload-less top layer that carries the image configuration.
///
/// Keyed by the config blob digest, so two images sharing every filesystem
/// layer but differing in configuration diverge only here.
pub(crate) fn config_layer(config_digest: &str, image: &ImageConfiguration) -> LayerDescriptor {
    LayerDescriptor {
        digest: config_digest.to_string(),
        payload: None,
        size: None,
        config: layer_config(image),
        locator: String::new(),
    }
}

/// Entrypoint followed by cmd, or the fallback shell when both are empty.
pub(crate) fn run_command(config: &LayerConfig) -> Vec<String> {
    let command = super::entry_command(config);
    if command.is_empty() {
        vec![FALLBACK_COMMAND.to_string()]
    } else {
        command
    }
}
