//! Template deletion and orphan sweeping.
//!
//! Deleting a template unbinds its name and then walks the layer chain
//! upward from the topmost layer, removing each layer until it reaches one
//! that is still referenced. A layer is referenced while another layer
//! names it as parent or a template name is bound to it. References are
//! counted from disk after every removal, never cached.

use sandbox_image_core::error::{Result, TemplateError};

use crate::id::LayerId;
use crate::index::NameIndex;
use crate::layer_store::LayerStore;

/// Outcome of a sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Unreferenced layers removed
    pub removed: Vec<LayerId>,
    /// Leftover staging and trash directories removed
    pub stale_dirs: usize,
}

/// Removes templates and the layers only they use.
pub struct Deleter<'a> {
    layers: &'a LayerStore,
    index: &'a NameIndex,
}

impl<'a> Deleter<'a> {
    pub fn new(layers: &'a LayerStore, index: &'a NameIndex) -> Self {
        Self { layers, index }
    }

    /// Delete the template `name`.
    ///
    /// Returns the ids of the layers actually removed, topmost first.
    pub fn delete(&self, name: &str) -> Result<Vec<LayerId>> {
        let top = self.index.unbind(name)?;
        tracing::info!(name = %name, top = %top, "Deleting template");

        let mut removed = Vec::new();
        if self.references(&top)? > 0 {
            tracing::debug!(id = %top, "Topmost layer still referenced, keeping chain");
            return Ok(removed);
        }

        let mut current = Some(top);
        while let Some(id) = current.take() {
            // Read before removal, the parent link goes away with the layer
            let parent = match self.layers.get(&id) {
                Ok(layer) => layer.meta.parent,
                Err(TemplateError::LayerNotFound(_)) => {
                    tracing::warn!(id = %id, "Layer already gone, parent unknown");
                    break;
                }
                Err(e) => return Err(e),
            };

            match self.layers.remove(&id) {
                Ok(()) => removed.push(id),
                // Removed by an earlier interrupted run
                Err(TemplateError::LayerNotFound(_)) => {
                    tracing::debug!(id = %id, "Layer already removed")
                }
                Err(e) => return Err(e),
            }

            if let Some(parent) = parent {
                let references = self.references(&parent)?;
                if references == 0 {
                    current = Some(parent);
                } else {
                    tracing::debug!(id = %parent, references, "Ancestor still referenced");
                }
            }
        }

        tracing::info!(name = %name, removed = removed.len(), "Template deleted");
        Ok(removed)
    }

    /// Number of layers naming `id` as parent plus names bound to it.
    pub fn references(&self, id: &LayerId) -> Result<usize> {
        let children = self.layers.children_of(id)?.len();
        let names = self.index.names_for(id)?.len();
        Ok(children + names)
    }

    /// Layers that nothing references: no child layer and no bound name.
    pub fn orphans(&self) -> Result<Vec<LayerId>> {
        let layers = self.layers.list_layers()?;
        let mut orphans = Vec::new();
        for layer in &layers {
            let has_child = layers.iter().any(|other| other.parent() == Some(layer.id()));
            if !has_child && self.index.names_for(layer.id())?.is_empty() {
                orphans.push(layer.id().clone());
            }
        }
        Ok(orphans)
    }

    /// Remove unreferenced layers until none are left, plus leftover
    /// staging and trash directories.
    ///
    /// Every layer that is not part of a named template's chain is
    /// reclaimed. Must not run concurrently with an ingestion, whose
    /// not-yet-bound layers look unreferenced.
    pub fn sweep(&self) -> Result<SweepReport> {
        let mut report = SweepReport {
            stale_dirs: self.layers.cleanup_stale()?,
            ..Default::default()
        };

        loop {
            let orphans = self.orphans()?;
            if orphans.is_empty() {
                break;
            }
            for id in orphans {
                match self.layers.remove(&id) {
                    Ok(()) => report.removed.push(id),
                    Err(TemplateError::LayerNotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        if !report.removed.is_empty() || report.stale_dirs > 0 {
            tracing::info!(
                layers = report.removed.len(),
                stale_dirs = report.stale_dirs,
                "Swept store"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{LayerConfig, LayerMeta};
    use tempfile::TempDir;

    fn add(layers: &LayerStore, parent: Option<&LayerId>, digest: &str) -> LayerId {
        layers
            .put(
                LayerMeta {
                    id: LayerId::chain(parent, digest),
                    parent: parent.cloned(),
                    digest: digest.to_string(),
                    payload: None,
                    size_bytes: 0,
                    source: "test".to_string(),
                    created_at: chrono::Utc::now(),
                    config: LayerConfig::default(),
                },
                None,
            )
            .unwrap()
    }

    fn setup(tmp: &TempDir) -> (LayerStore, NameIndex) {
        (LayerStore::new(tmp.path()).unwrap(), NameIndex::new(tmp.path()))
    }

    #[test]
    fn test_delete_private_chain() {
        let tmp = TempDir::new().unwrap();
        let (layers, index) = setup(&tmp);
        let a = add(&layers, None, "sha256:a");
        let b = add(&layers, Some(&a), "sha256:b");
        let c = add(&layers, Some(&b), "sha256:c");
        index.bind("t", &c).unwrap();

        let removed = Deleter::new(&layers, &index).delete("t").unwrap();
        assert_eq!(removed, vec![c, b, a]);
        assert!(layers.list().unwrap().is_empty());
    }

    #[test]
    fn test_delete_stops_at_shared_ancestor() {
        let tmp = TempDir::new().unwrap();
        let (layers, index) = setup(&tmp);
        let base = add(&layers, None, "sha256:base");
        let one = add(&layers, Some(&base), "sha256:one");
        let two = add(&layers, Some(&base), "sha256:two");
        index.bind("one", &one).unwrap();
        index.bind("two", &two).unwrap();

        let removed = Deleter::new(&layers, &index).delete("one").unwrap();
        assert_eq!(removed, vec![one]);
        assert!(layers.contains(&base));
        assert!(layers.contains(&two));
    }

    #[test]
    fn test_delete_keeps_layer_with_other_name() {
        let tmp = TempDir::new().unwrap();
        let (layers, index) = setup(&tmp);
        let a = add(&layers, None, "sha256:a");
        index.bind("first", &a).unwrap();
        index.bind("second", &a).unwrap();

        let deleter = Deleter::new(&layers, &index);
        assert!(deleter.delete("first").unwrap().is_empty());
        assert!(layers.contains(&a));
        assert_eq!(deleter.delete("second").unwrap(), vec![a]);
    }

    #[test]
    fn test_delete_stops_at_named_ancestor() {
        let tmp = TempDir::new().unwrap();
        let (layers, index) = setup(&tmp);
        let base = add(&layers, None, "sha256:base");
        let app = add(&layers, Some(&base), "sha256:app");
        index.bind("base", &base).unwrap();
        index.bind("app", &app).unwrap();

        assert_eq!(Deleter::new(&layers, &index).delete("app").unwrap(), vec![app]);
        assert_eq!(index.resolve("base").unwrap(), base);
    }

    #[test]
    fn test_delete_unknown_name() {
        let tmp = TempDir::new().unwrap();
        let (layers, index) = setup(&tmp);
        let err = Deleter::new(&layers, &index).delete("nope").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_orphans_and_sweep() {
        let tmp = TempDir::new().unwrap();
        let (layers, index) = setup(&tmp);
        let a = add(&layers, None, "sha256:a");
        let b = add(&layers, Some(&a), "sha256:b");
        let kept = add(&layers, None, "sha256:kept");
        index.bind("kept", &kept).unwrap();
        std::fs::create_dir_all(tmp.path().join(".staging-x")).unwrap();

        let deleter = Deleter::new(&layers, &index);
        assert_eq!(deleter.orphans().unwrap(), vec![b.clone()]);

        let report = deleter.sweep().unwrap();
        assert_eq!(report.removed, vec![b, a]);
        assert_eq!(report.stale_dirs, 1);
        assert_eq!(layers.list().unwrap(), vec![kept]);
    }

    #[test]
    fn test_references_counts_children_and_names() {
        let tmp = TempDir::new().unwrap();
        let (layers, index) = setup(&tmp);
        let a = add(&layers, None, "sha256:a");
        add(&layers, Some(&a), "sha256:b");
        add(&layers, Some(&a), "sha256:c");
        index.bind("a", &a).unwrap();

        assert_eq!(Deleter::new(&layers, &index).references(&a).unwrap(), 3);
    }
}
