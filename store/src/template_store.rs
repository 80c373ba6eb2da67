//! Template store facade.
//!
//! Ties the layer store, the name index and the registered sources to one
//! [`StoreConfig`]. Every operation reads the current disk state; the facade
//! keeps no cache.

use std::path::Path;

use sandbox_image_core::error::Result;
use sandbox_image_core::{DiskFormat, StoreConfig};

use crate::delete::{Deleter, SweepReport};
use crate::id::LayerId;
use crate::index::NameIndex;
use crate::ingest::{IngestReport, Ingestor};
use crate::layer_store::LayerStore;
use crate::materialize::{Materializer, RunArtifact};
use crate::resolve::{LaunchSpec, ResolvedTemplate, Resolver, RunOptions};
use crate::source::{FetchRequest, SourceRegistry};

/// Summary of one named template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSummary {
    pub name: String,
    /// Topmost layer
    pub top: LayerId,
    /// Number of layers in the chain
    pub depth: usize,
    /// Total payload size of the chain in bytes
    pub size_bytes: u64,
    /// Source that created the topmost layer
    pub source: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// A layered template store.
pub struct TemplateStore {
    config: StoreConfig,
    layers: LayerStore,
    index: NameIndex,
    sources: SourceRegistry,
}

impl TemplateStore {
    /// Open the store described by `config`, creating its directories.
    pub fn open(config: StoreConfig, sources: SourceRegistry) -> Result<Self> {
        config.ensure_dirs()?;
        let layers = LayerStore::new(&config.template_dir)?;
        let index = NameIndex::new(&config.template_dir);

        tracing::debug!(
            template_dir = %config.template_dir.display(),
            storage_dir = %config.storage_dir.display(),
            "Opened template store"
        );

        Ok(Self {
            config,
            layers,
            index,
            sources,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn layers(&self) -> &LayerStore {
        &self.layers
    }

    pub fn index(&self) -> &NameIndex {
        &self.index
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    /// Fetch a template from the source registered as `source` and bind it as `name`.
    pub async fn download(
        &self,
        name: &str,
        source: &str,
        request: &FetchRequest,
    ) -> Result<IngestReport> {
        let source = self.sources.get(source)?;
        Ingestor::new(&self.layers, &self.index)
            .ingest(source.as_ref(), request, name)
            .await
    }

    /// Delete template `name` and every layer no other template uses.
    pub fn delete(&self, name: &str) -> Result<Vec<LayerId>> {
        Deleter::new(&self.layers, &self.index).delete(name)
    }

    /// Resolve `name` to its chain and merged configuration.
    pub fn resolve(&self, name: &str) -> Result<ResolvedTemplate> {
        Resolver::new(&self.layers, &self.index).resolve(name, &self.sources)
    }

    /// Materialize template `name` as a caller-owned artifact.
    pub fn create(&self, name: &str, format: DiskFormat) -> Result<RunArtifact> {
        let template = self.resolve(name)?;
        self.materializer().materialize(&template.chain, format)
    }

    /// Resolve, materialize and assemble everything needed to launch `name`.
    ///
    /// The artifact belongs to the caller, who discards it after use.
    pub fn run(&self, name: &str, options: RunOptions) -> Result<(LaunchSpec, RunArtifact)> {
        let template = self.resolve(name)?;
        let artifact = self
            .materializer()
            .materialize(&template.chain, options.format)?;
        let spec = LaunchSpec::assemble(&template, options, artifact.path().to_path_buf());
        Ok((spec, artifact))
    }

    /// Summaries of all named templates, sorted by name.
    pub fn list_templates(&self) -> Result<Vec<TemplateSummary>> {
        let resolver = Resolver::new(&self.layers, &self.index);
        let mut summaries = Vec::new();

        for (name, top) in self.index.list()? {
            let chain = resolver.chain(&top)?;
            let Some(layer) = chain.last() else {
                continue;
            };
            summaries.push(TemplateSummary {
                source: layer.meta.source.clone(),
                created_at: layer.meta.created_at,
                depth: chain.len(),
                size_bytes: chain.iter().map(|l| l.meta.size_bytes).sum(),
                name,
                top,
            });
        }

        Ok(summaries)
    }

    /// Reclaim unreferenced layers and leftovers of interrupted runs.
    pub fn sweep(&self) -> Result<SweepReport> {
        let mut report = Deleter::new(&self.layers, &self.index).sweep()?;
        report.stale_dirs += self.materializer().cleanup_stale()?;
        Ok(report)
    }

    fn materializer(&self) -> Materializer {
        Materializer::new(&self.config.storage_dir)
    }

    pub fn template_dir(&self) -> &Path {
        &self.config.template_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{LayerConfig, LayerMeta};
    use tempfile::TempDir;

    fn open(tmp: &TempDir) -> TemplateStore {
        TemplateStore::open(
            StoreConfig::with_template_dir(tmp.path().join("templates")),
            SourceRegistry::with_defaults(),
        )
        .unwrap()
    }

    #[test]
    fn test_open_creates_directories() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp);
        assert!(store.template_dir().is_dir());
        assert!(store.config().storage_dir.is_dir());
        assert!(store.list_templates().unwrap().is_empty());
    }

    #[test]
    fn test_list_templates() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp);

        let meta = |parent: Option<&LayerId>, digest: &str| LayerMeta {
            id: LayerId::chain(parent, digest),
            parent: parent.cloned(),
            digest: digest.to_string(),
            payload: None,
            size_bytes: 0,
            source: "oci-layout".to_string(),
            created_at: chrono::Utc::now(),
            config: LayerConfig::default(),
        };
        let root = store.layers().put(meta(None, "sha256:a"), None).unwrap();
        let top = store.layers().put(meta(Some(&root), "sha256:b"), None).unwrap();
        store.index().bind("fedora", &top).unwrap();

        let templates = store.list_templates().unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].name, "fedora");
        assert_eq!(templates[0].top, top);
        assert_eq!(templates[0].depth, 2);
        assert_eq!(templates[0].source, "oci-layout");
    }

    #[tokio::test]
    async fn test_download_unknown_source() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp);
        let err = store
            .download("x", "virt-builder", &FetchRequest::new("x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), sandbox_image_core::ErrorKind::Config);
    }
}
