//! Template ingestion.
//!
//! Turns the layer list announced by a source into stored layers and, once
//! every layer is present, binds the template name to the topmost one.
//! Layers already in the store are reused without fetching. A failure
//! leaves the layers stored so far in place and the name unbound.

use std::path::Path;

use sandbox_image_core::error::{Result, TemplateError};
use sha2::{Digest, Sha256};

use crate::id::LayerId;
use crate::index::{validate_name, NameIndex};
use crate::layer::LayerMeta;
use crate::layer_store::LayerStore;
use crate::source::{FetchRequest, LayerDescriptor, TemplateSource};

/// Outcome of a successful ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    /// Topmost layer, now bound to the template name
    pub top: LayerId,
    /// Layers written by this ingestion, root first
    pub stored: Vec<LayerId>,
    /// Layers that were already present, root first
    pub reused: Vec<LayerId>,
}

/// Writes source templates into a layer store and name index.
pub struct Ingestor<'a> {
    layers: &'a LayerStore,
    index: &'a NameIndex,
}

impl<'a> Ingestor<'a> {
    pub fn new(layers: &'a LayerStore, index: &'a NameIndex) -> Self {
        Self { layers, index }
    }

    /// Fetch the template described by `request` from `source` and bind it as `name`.
    pub async fn ingest(
        &self,
        source: &dyn TemplateSource,
        request: &FetchRequest,
        name: &str,
    ) -> Result<IngestReport> {
        // Checked again by bind; this one avoids a pointless download
        validate_name(name)?;
        if self.index.list()?.contains_key(name) {
            return Err(TemplateError::AlreadyExists(name.to_string()));
        }

        let descriptors = source.fetch_template(request).await?;
        if descriptors.is_empty() {
            return Err(TemplateError::source_unavailable(
                source.name(),
                format!("'{}' has no layers", request.reference),
            ));
        }

        tracing::info!(
            name = %name,
            source = source.name(),
            reference = %request.reference,
            layers = descriptors.len(),
            "Ingesting template"
        );

        let mut parent: Option<LayerId> = None;
        let mut stored = Vec::new();
        let mut reused = Vec::new();

        for descriptor in &descriptors {
            let id = LayerId::chain(parent.as_ref(), &descriptor.digest);

            if self.layers.contains(&id) {
                tracing::debug!(id = %id, digest = %descriptor.digest, "Reusing stored layer");
                reused.push(id.clone());
            } else {
                self.store_layer(source, request, descriptor, &id, parent.clone())
                    .await?;
                stored.push(id.clone());
            }

            parent = Some(id);
        }

        let top = parent.ok_or_else(|| {
            TemplateError::source_unavailable(source.name(), "Template has no layers")
        })?;
        self.index.bind(name, &top)?;

        tracing::info!(
            name = %name,
            top = %top,
            stored = stored.len(),
            reused = reused.len(),
            "Template ingested"
        );

        Ok(IngestReport {
            top,
            stored,
            reused,
        })
    }

    async fn store_layer(
        &self,
        source: &dyn TemplateSource,
        request: &FetchRequest,
        descriptor: &LayerDescriptor,
        id: &LayerId,
        parent: Option<LayerId>,
    ) -> Result<()> {
        let staged = self.layers.stage().map_err(|e| {
            TemplateError::corrupt(id.as_str(), format!("Failed to stage layer: {}", e))
        })?;

        if descriptor.payload.is_some() {
            let payload_path = staged.payload_path();
            source
                .fetch_payload(request, descriptor, &payload_path)
                .await?;
            verify_digest(source.name(), &payload_path, &descriptor.digest)?;
        }

        let meta = LayerMeta {
            id: id.clone(),
            parent,
            digest: descriptor.digest.clone(),
            payload: descriptor.payload,
            size_bytes: 0,
            source: source.name().to_string(),
            created_at: chrono::Utc::now(),
            config: descriptor.config.clone(),
        };
        self.layers.commit(staged, meta)?;
        Ok(())
    }
}

/// Check a downloaded payload against a `sha256:` digest.
///
/// Digests in other algorithms are not checked.
fn verify_digest(source: &str, path: &Path, digest: &str) -> Result<()> {
    let Some(expected) = digest.strip_prefix("sha256:") else {
        tracing::debug!(digest = %digest, "Skipping verification of non-sha256 digest");
        return Ok(());
    };

    let mut file = std::fs::File::open(path).map_err(|e| TemplateError::io(path, e))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).map_err(|e| TemplateError::io(path, e))?;
    let actual = hex::encode(hasher.finalize());

    if !actual.eq_ignore_ascii_case(expected) {
        return Err(TemplateError::source_unavailable(
            source,
            format!("Digest mismatch for {}: got sha256:{}", digest, actual),
        ));
    }
    Ok(())
}
