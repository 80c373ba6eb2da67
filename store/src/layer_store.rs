//! Directory-per-layer storage.
//!
//! Each layer lives under `<root>/<layer-id>/` with its metadata in
//! `template.json` and its payload archive in `data`. Layers are written
//! into a private `.staging-*` directory and published with a single
//! rename, and removed by renaming them to `.trash-*` before deleting, so a
//! reader sees either the whole layer or no layer at all.

use std::path::{Path, PathBuf};

use sandbox_image_core::error::{Result, TemplateError};

use crate::id::LayerId;
use crate::layer::{Layer, LayerMeta, DATA_FILE, TEMPLATE_FILE};

const STAGING_PREFIX: &str = ".staging-";
const TRASH_PREFIX: &str = ".trash-";

/// Layer storage rooted at the template directory.
pub struct LayerStore {
    root: PathBuf,
}

/// A layer directory being filled before it is committed to the store.
///
/// Dropping an uncommitted stage removes its directory.
pub struct StagedLayer {
    dir: PathBuf,
    committed: bool,
}

impl StagedLayer {
    /// Where the payload archive must be written.
    pub fn payload_path(&self) -> PathBuf {
        self.dir.join(DATA_FILE)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Drop for StagedLayer {
    fn drop(&mut self) {
        if !self.committed && self.dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.dir) {
                tracing::warn!(dir = %self.dir.display(), error = %e, "Failed to clean staging directory");
            }
        }
    }
}

impl LayerStore {
    /// Open a layer store, creating the root directory if needed.
    pub fn new(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root).map_err(|e| TemplateError::io(root, e))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a layer, whether or not it exists.
    pub fn layer_dir(&self, id: &LayerId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Whether a committed layer with this id exists.
    pub fn contains(&self, id: &LayerId) -> bool {
        self.layer_dir(id).join(TEMPLATE_FILE).is_file()
    }

    /// Read a layer's metadata.
    pub fn get(&self, id: &LayerId) -> Result<Layer> {
        let dir = self.layer_dir(id);
        let meta_path = dir.join(TEMPLATE_FILE);

        let content = match std::fs::read_to_string(&meta_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TemplateError::LayerNotFound(id.to_string()));
            }
            Err(e) => return Err(TemplateError::io(&meta_path, e)),
        };

        let meta: LayerMeta = serde_json::from_str(&content).map_err(|e| {
            TemplateError::corrupt(id.as_str(), format!("Unreadable {}: {}", TEMPLATE_FILE, e))
        })?;

        if &meta.id != id {
            return Err(TemplateError::corrupt(
                id.as_str(),
                format!("Metadata names a different layer: {}", meta.id),
            ));
        }

        Ok(Layer { meta, dir })
    }

    /// Store a layer, copying its payload from `payload`.
    ///
    /// Storing a layer that already exists with identical content is a no-op.
    pub fn put(&self, meta: LayerMeta, payload: Option<&Path>) -> Result<LayerId> {
        if self.contains(&meta.id) {
            return self.check_existing(&meta);
        }

        let staged = self.stage()?;
        if let Some(src) = payload {
            std::fs::copy(src, staged.payload_path()).map_err(|e| {
                TemplateError::corrupt(
                    meta.id.as_str(),
                    format!("Failed to copy payload {}: {}", src.display(), e),
                )
            })?;
        }
        self.commit(staged, meta)
    }

    /// Create an empty staging directory for a new layer.
    pub fn stage(&self) -> Result<StagedLayer> {
        let dir = self
            .root
            .join(format!("{}{}", STAGING_PREFIX, uuid::Uuid::new_v4()));
        std::fs::create_dir(&dir).map_err(|e| TemplateError::io(&dir, e))?;
        Ok(StagedLayer {
            dir,
            committed: false,
        })
    }

    /// Publish a staged layer under `meta.id`.
    ///
    /// The payload, if `meta.payload` says there is one, must already be
    /// written to `staged.payload_path()`. The recorded size is taken from it.
    pub fn commit(&self, mut staged: StagedLayer, mut meta: LayerMeta) -> Result<LayerId> {
        let id = meta.id.clone();

        if meta.payload.is_some() {
            let payload_path = staged.payload_path();
            let len = std::fs::metadata(&payload_path)
                .map_err(|e| {
                    TemplateError::corrupt(id.as_str(), format!("Staged payload missing: {}", e))
                })?
                .len();
            meta.size_bytes = len;
        } else {
            meta.size_bytes = 0;
        }

        if self.contains(&id) {
            return self.check_existing(&meta);
        }

        let meta_path = staged.dir.join(TEMPLATE_FILE);
        std::fs::write(&meta_path, serde_json::to_string_pretty(&meta)?).map_err(|e| {
            TemplateError::corrupt(
                id.as_str(),
                format!("Failed to write {}: {}", meta_path.display(), e),
            )
        })?;

        let target = self.layer_dir(&id);
        if let Err(e) = std::fs::rename(&staged.dir, &target) {
            // Another writer may have published the same layer in between
            if self.contains(&id) {
                return self.check_existing(&meta);
            }
            return Err(TemplateError::corrupt(
                id.as_str(),
                format!("Failed to publish layer to {}: {}", target.display(), e),
            ));
        }
        staged.committed = true;

        tracing::debug!(
            id = %id,
            parent = ?meta.parent.as_ref().map(|p| p.as_str()),
            size_bytes = meta.size_bytes,
            "Stored layer"
        );

        Ok(id)
    }

    /// Delete a layer directory with everything in it.
    pub fn remove(&self, id: &LayerId) -> Result<()> {
        if !self.contains(id) {
            return Err(TemplateError::LayerNotFound(id.to_string()));
        }

        let dir = self.layer_dir(id);
        let trash = self
            .root
            .join(format!("{}{}", TRASH_PREFIX, uuid::Uuid::new_v4()));

        match std::fs::rename(&dir, &trash) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TemplateError::LayerNotFound(id.to_string()));
            }
            Err(e) => return Err(TemplateError::io(&dir, e)),
        }

        if let Err(e) = std::fs::remove_dir_all(&trash) {
            // The layer is already invisible; the sweep reclaims the leftovers.
            tracing::warn!(
                id = %id,
                trash = %trash.display(),
                error = %e,
                "Failed to delete removed layer data"
            );
        }

        tracing::debug!(id = %id, "Removed layer");
        Ok(())
    }

    /// List the ids of all committed layers, sorted.
    pub fn list(&self) -> Result<Vec<LayerId>> {
        let read_dir = std::fs::read_dir(&self.root).map_err(|e| TemplateError::io(&self.root, e))?;

        let mut ids = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| TemplateError::io(&self.root, e))?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            if !entry.path().join(TEMPLATE_FILE).is_file() {
                continue;
            }
            if let Ok(id) = LayerId::new(name) {
                ids.push(id);
            }
        }

        ids.sort();
        Ok(ids)
    }

    /// Read every committed layer.
    ///
    /// Layers that vanish between listing and reading are skipped.
    pub fn list_layers(&self) -> Result<Vec<Layer>> {
        let mut layers = Vec::new();
        for id in self.list()? {
            match self.get(&id) {
                Ok(layer) => layers.push(layer),
                Err(TemplateError::LayerNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(layers)
    }

    /// Ids of all layers whose parent is `id`, counted from the current disk state.
    pub fn children_of(&self, id: &LayerId) -> Result<Vec<LayerId>> {
        Ok(self
            .list_layers()?
            .into_iter()
            .filter(|layer| layer.parent() == Some(id))
            .map(|layer| layer.meta.id)
            .collect())
    }

    /// Payload size of a layer in bytes, 0 for layers without payload.
    pub fn size_of(&self, id: &LayerId) -> Result<u64> {
        Ok(self.get(id)?.meta.size_bytes)
    }

    /// Remove staging and trash directories left behind by interrupted runs.
    ///
    /// Returns the number of directories removed.
    pub fn cleanup_stale(&self) -> Result<usize> {
        let read_dir = std::fs::read_dir(&self.root).map_err(|e| TemplateError::io(&self.root, e))?;

        let mut removed = 0;
        for entry in read_dir.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !(name.starts_with(STAGING_PREFIX) || name.starts_with(TRASH_PREFIX)) {
                continue;
            }
            let path = entry.path();
            std::fs::remove_dir_all(&path).map_err(|e| TemplateError::io(&path, e))?;
            tracing::debug!(dir = %path.display(), "Removed stale directory");
            removed += 1;
        }

        Ok(removed)
    }

    /// Accept a layer that is already present if its content matches.
    fn check_existing(&self, meta: &LayerMeta) -> Result<LayerId> {
        let existing = self.get(&meta.id)?;
        if existing.meta.same_content(meta) {
            tracing::debug!(id = %meta.id, "Layer already present");
            Ok(meta.id.clone())
        } else {
            Err(TemplateError::corrupt(
                meta.id.as_str(),
                "Layer exists with different content",
            ))
        }
    }
}
