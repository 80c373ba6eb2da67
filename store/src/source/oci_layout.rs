//! Local OCI image layout source.
//!
//! Reads an image from an OCI image layout directory (`oci-layout`,
//! `index.json`, `blobs/<alg>/<hex>`), as written by `skopeo copy` or
//! `docker buildx --output type=oci`. The fetch reference is the layout
//! directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use oci_spec::image::{ImageConfiguration, ImageIndex, ImageManifest};
use sandbox_image_core::error::{Result, TemplateError};

use super::{oci, FetchRequest, LayerDescriptor, TemplateSource};
use crate::layer::LayerConfig;

/// Registry key of this source.
pub(crate) const SOURCE_NAME: &str = "oci-layout";

/// Template source reading OCI image layouts from the local filesystem.
#[derive(Debug, Default)]
pub struct OciLayoutSource;

impl OciLayoutSource {
    pub fn new() -> Self {
        Self
    }

    fn unavailable(root: &Path, message: impl std::fmt::Display) -> TemplateError {
        TemplateError::source_unavailable(SOURCE_NAME, format!("{}: {}", root.display(), message))
    }

    /// Validate that the directory contains an OCI layout.
    fn validate_layout(root: &Path) -> Result<()> {
        for required in ["oci-layout", "index.json", "blobs"] {
            if !root.join(required).exists() {
                return Err(Self::unavailable(
                    root,
                    format!("not an OCI layout, missing {}", required),
                ));
            }
        }
        Ok(())
    }

    fn read_blob(root: &Path, digest: &str) -> Result<String> {
        let path = blob_path(root, digest);
        std::fs::read_to_string(&path)
            .map_err(|e| Self::unavailable(root, format!("Failed to read blob {}: {}", digest, e)))
    }

    fn load_manifest(root: &Path) -> Result<ImageManifest> {
        let index_path = root.join("index.json");
        let content = std::fs::read_to_string(&index_path)
            .map_err(|e| Self::unavailable(root, format!("Failed to read index.json: {}", e)))?;
        let index: ImageIndex = serde_json::from_str(&content)
            .map_err(|e| Self::unavailable(root, format!("Failed to parse index.json: {}", e)))?;

        let manifest_digest = index
            .manifests()
            .first()
            .ok_or_else(|| Self::unavailable(root, "No manifests in index.json"))?
            .digest()
            .to_string();

        serde_json::from_str(&Self::read_blob(root, &manifest_digest)?)
            .map_err(|e| Self::unavailable(root, format!("Failed to parse manifest: {}", e)))
    }
}

#[async_trait]
impl TemplateSource for OciLayoutSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch_template(&self, request: &FetchRequest) -> Result<Vec<LayerDescriptor>> {
        let root = PathBuf::from(&request.reference);
        Self::validate_layout(&root)?;

        let manifest = Self::load_manifest(&root)?;
        let config_digest = manifest.config().digest().to_string();
        let config_blob = Self::read_blob(&root, &config_digest)?;
        let image: ImageConfiguration = oci::parse_image_config(config_blob.as_bytes())
            .map_err(|e| Self::unavailable(&root, format!("Failed to parse image config: {}", e)))?;

        let mut layers = manifest
            .layers()
            .iter()
            .map(|layer| {
                let digest = layer.digest().to_string();
                let locator = blob_path(&root, &digest).to_string_lossy().into_owned();
                oci::payload_layer(&layer.media_type().to_string(), &digest, layer.size(), locator)
            })
            .collect::<Result<Vec<_>>>()?;
        layers.push(oci::config_layer(&config_digest, &image));

        tracing::debug!(
            layout = %root.display(),
            layers = layers.len(),
            "OCI layout read"
        );

        Ok(layers)
    }

    async fn fetch_payload(
        &self,
        request: &FetchRequest,
        layer: &LayerDescriptor,
        dest: &Path,
    ) -> Result<()> {
        let blob = PathBuf::from(&layer.locator);
        tokio::fs::copy(&blob, dest).await.map_err(|e| {
            Self::unavailable(
                Path::new(&request.reference),
                format!("Failed to copy layer {}: {}", layer.digest, e),
            )
        })?;
        Ok(())
    }

    fn resolve_run_command(&self, config: &LayerConfig) -> Vec<String> {
        oci::run_command(config)
    }
}

/// Path of a blob by digest ("sha256:abc123..." → blobs/sha256/abc123).
fn blob_path(root: &Path, digest: &str) -> PathBuf {
    let (algorithm, hash) = digest.split_once(':').unwrap_or(("sha256", digest));
    root.join("blobs").join(algorithm).join(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::PayloadFormat;
    use sha2::{Digest, Sha256};
    use std::fs;
    use tempfile::TempDir;

    fn write_blob(root: &Path, data: &[u8]) -> String {
        let hex = hex::encode(Sha256::digest(data));
        fs::write(root.join("blobs/sha256").join(&hex), data).unwrap();
        format!("sha256:{}", hex)
    }

    fn create_layout(root: &Path) -> (String, String) {
        fs::create_dir_all(root.join("blobs/sha256")).unwrap();
        fs::write(root.join("oci-layout"), r#"{"imageLayoutVersion":"1.0.0"}"#).unwrap();

        let config = r#"{
            "architecture": "amd64",
            "os": "linux",
            "config": {
                "Cmd": ["/bin/bash"],
                "Env": ["PATH=/usr/bin:/bin"]
            },
            "rootfs": {"type": "layers", "diff_ids": []}
        }"#;
        let config_digest = write_blob(root, config.as_bytes());
        let layer_digest = write_blob(root, b"not really a tarball");

        let manifest = format!(
            r#"{{
                "schemaVersion": 2,
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "config": {{
                    "mediaType": "application/vnd.oci.image.config.v1+json",
                    "digest": "{}",
                    "size": {}
                }},
                "layers": [{{
                    "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
                    "digest": "{}",
                    "size": 20
                }}]
            }}"#,
            config_digest,
            config.len(),
            layer_digest
        );
        let manifest_digest = write_blob(root, manifest.as_bytes());

        let index = format!(
            r#"{{
                "schemaVersion": 2,
                "manifests": [{{
                    "mediaType": "application/vnd.oci.image.manifest.v1+json",
                    "digest": "{}",
                    "size": {}
                }}]
            }}"#,
            manifest_digest,
            manifest.len()
        );
        fs::write(root.join("index.json"), index).unwrap();

        (config_digest, layer_digest)
    }

    #[tokio::test]
    async fn test_fetch_template() {
        let tmp = TempDir::new().unwrap();
        let (config_digest, layer_digest) = create_layout(tmp.path());

        let source = OciLayoutSource::new();
        let request = FetchRequest::new(tmp.path().to_string_lossy());
        let layers = source.fetch_template(&request).await.unwrap();

        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0].digest, layer_digest);
        assert_eq!(layers[0].payload, Some(PayloadFormat::TarGzip));
        assert_eq!(layers[0].size, Some(20));
        assert_eq!(layers[1].digest, config_digest);
        assert_eq!(layers[1].payload, None);
        assert_eq!(layers[1].config.cmd, vec!["/bin/bash"]);
    }

    #[tokio::test]
    async fn test_fetch_payload_copies_blob() {
        let tmp = TempDir::new().unwrap();
        let layout = tmp.path().join("layout");
        create_layout(&layout);

        let source = OciLayoutSource::new();
        let request = FetchRequest::new(layout.to_string_lossy());
        let layers = source.fetch_template(&request).await.unwrap();

        let dest = tmp.path().join("data");
        source.fetch_payload(&request, &layers[0], &dest).await.unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"not really a tarball");
    }

    #[tokio::test]
    async fn test_download_image_without_history() {
        let tmp = TempDir::new().unwrap();
        let layout = tmp.path().join("layout");
        let (config_digest, _) = create_layout(&layout);
        let config = fs::read_to_string(blob_path(&layout, &config_digest)).unwrap();
        assert!(!config.contains("history"));

        let store = crate::TemplateStore::open(
            sandbox_image_core::StoreConfig::with_template_dir(tmp.path().join("templates")),
            crate::SourceRegistry::with_defaults(),
        )
        .unwrap();
        let report = store
            .download("shell", SOURCE_NAME, &FetchRequest::new(layout.to_string_lossy()))
            .await
            .unwrap();

        assert_eq!(report.stored.len(), 2);
        let resolved = store.resolve("shell").unwrap();
        assert_eq!(resolved.command, vec!["/bin/bash"]);
        assert_eq!(resolved.config.env[0].key, "PATH");
    }

    #[tokio::test]
    async fn test_fetch_template_not_a_layout() {
        let tmp = TempDir::new().unwrap();
        let source = OciLayoutSource::new();
        let err = source
            .fetch_template(&FetchRequest::new(tmp.path().to_string_lossy()))
            .await
            .unwrap_err();
        assert!(matches!(err, TemplateError::SourceUnavailable { .. }));
        assert!(err.to_string().contains("oci-layout"));
    }

    #[test]
    fn test_blob_path() {
        let root = PathBuf::from("/images/test");
        assert_eq!(
            blob_path(&root, "sha256:abc123"),
            PathBuf::from("/images/test/blobs/sha256/abc123")
        );
        assert_eq!(
            blob_path(&root, "abc123"),
            PathBuf::from("/images/test/blobs/sha256/abc123")
        );
    }
}
