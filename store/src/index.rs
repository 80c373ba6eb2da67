//! Template name index.
//!
//! A template name is bound to the topmost layer of its chain by listing the
//! name in that layer's `index.json`. The index is rebuilt from disk on
//! every lookup; there is no cached copy to go stale.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sandbox_image_core::error::{Result, TemplateError};
use serde::{Deserialize, Serialize};

use crate::id::LayerId;
use crate::layer::{INDEX_FILE, TEMPLATE_FILE};

/// Contents of a layer's `index.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    names: Vec<String>,
}

/// Name → topmost layer bindings.
pub struct NameIndex {
    root: PathBuf,
}

impl NameIndex {
    /// Create an index over the layer directories below `root`.
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// Bind `name` to layer `id`.
    pub fn bind(&self, name: &str, id: &LayerId) -> Result<()> {
        validate_name(name)?;

        if self.list()?.contains_key(name) {
            return Err(TemplateError::AlreadyExists(name.to_string()));
        }

        let layer_dir = self.root.join(id.as_str());
        if !layer_dir.join(TEMPLATE_FILE).is_file() {
            return Err(TemplateError::LayerNotFound(id.to_string()));
        }

        let mut index = self.read_index(id)?.unwrap_or_default();
        index.names.push(name.to_string());
        self.write_index(id, &index)?;

        tracing::info!(name = %name, id = %id, "Bound template name");
        Ok(())
    }

    /// Look up the layer bound to `name`.
    pub fn resolve(&self, name: &str) -> Result<LayerId> {
        self.list()?
            .remove(name)
            .ok_or_else(|| TemplateError::TemplateNotFound(name.to_string()))
    }

    /// Remove the binding for `name` and return the layer it pointed to.
    pub fn unbind(&self, name: &str) -> Result<LayerId> {
        let id = self.resolve(name)?;

        let mut index = self.read_index(&id)?.unwrap_or_default();
        index.names.retain(|n| n != name);

        if index.names.is_empty() {
            let path = self.index_path(&id);
            std::fs::remove_file(&path).map_err(|e| TemplateError::io(&path, e))?;
        } else {
            self.write_index(&id, &index)?;
        }

        tracing::info!(name = %name, id = %id, "Unbound template name");
        Ok(id)
    }

    /// All bindings, keyed by name.
    pub fn list(&self) -> Result<BTreeMap<String, LayerId>> {
        let read_dir = std::fs::read_dir(&self.root).map_err(|e| TemplateError::io(&self.root, e))?;

        let mut names = BTreeMap::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| TemplateError::io(&self.root, e))?;
            let Some(dir_name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if dir_name.starts_with('.') {
                continue;
            }
            let Ok(id) = LayerId::new(dir_name) else {
                continue;
            };
            let Some(index) = self.read_index(&id)? else {
                continue;
            };

            for name in index.names {
                if let Some(other) = names.insert(name.clone(), id.clone()) {
                    return Err(TemplateError::corrupt(
                        id.as_str(),
                        format!("Template '{}' is also bound to layer {}", name, other),
                    ));
                }
            }
        }

        Ok(names)
    }

    /// Names bound to layer `id`.
    pub fn names_for(&self, id: &LayerId) -> Result<Vec<String>> {
        Ok(self.read_index(id)?.map(|i| i.names).unwrap_or_default())
    }

    fn index_path(&self, id: &LayerId) -> PathBuf {
        self.root.join(id.as_str()).join(INDEX_FILE)
    }

    fn read_index(&self, id: &LayerId) -> Result<Option<IndexFile>> {
        let path = self.index_path(id);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(TemplateError::io(&path, e)),
        };

        let index = serde_json::from_str(&content).map_err(|e| {
            TemplateError::corrupt(id.as_str(), format!("Unreadable {}: {}", INDEX_FILE, e))
        })?;
        Ok(Some(index))
    }

    /// Replace the index file through a rename so readers never see a torn write.
    fn write_index(&self, id: &LayerId, index: &IndexFile) -> Result<()> {
        let path = self.index_path(id);
        let tmp = path.with_extension("json.tmp");

        std::fs::write(&tmp, serde_json::to_string_pretty(index)?)
            .map_err(|e| TemplateError::io(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| TemplateError::io(&path, e))?;
        Ok(())
    }
}

/// Reject names that cannot be stored.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(TemplateError::ConfigError("Empty template name".to_string()));
    }
    if name.chars().any(char::is_control) {
        return Err(TemplateError::ConfigError(format!(
            "Invalid template name {:?}: control characters are not allowed",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{LayerConfig, LayerMeta};
    use crate::layer_store::LayerStore;
    use tempfile::TempDir;

    fn add_layer(store: &LayerStore, digest: &str) -> LayerId {
        store
            .put(
                LayerMeta {
                    id: LayerId::chain(None, digest),
                    parent: None,
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

    #[test]
    fn test_bind_and_resolve() {
        let tmp = TempDir::new().unwrap();
        let store = LayerStore::new(tmp.path()).unwrap();
        let index = NameIndex::new(tmp.path());
        let id = add_layer(&store, "sha256:a");

        index.bind("fedora", &id).unwrap();
        assert_eq!(index.resolve("fedora").unwrap(), id);
        assert_eq!(index.names_for(&id).unwrap(), vec!["fedora"]);
    }

    #[test]
    fn test_bind_existing_name_fails() {
        let tmp = TempDir::new().unwrap();
        let store = LayerStore::new(tmp.path()).unwrap();
        let index = NameIndex::new(tmp.path());
        let a = add_layer(&store, "sha256:a");
        let b = add_layer(&store, "sha256:b");

        index.bind("fedora", &a).unwrap();
        let err = index.bind("fedora", &b).unwrap_err();
        assert!(matches!(err, TemplateError::AlreadyExists(_)));
        assert_eq!(index.resolve("fedora").unwrap(), a);
    }

    #[test]
    fn test_bind_missing_layer_fails() {
        let tmp = TempDir::new().unwrap();
        let index = NameIndex::new(tmp.path());
        let err = index
            .bind("fedora", &LayerId::new("missing").unwrap())
            .unwrap_err();
        assert!(matches!(err, TemplateError::LayerNotFound(_)));
    }

    #[test]
    fn test_bind_rejects_empty_name() {
        let tmp = TempDir::new().unwrap();
        let store = LayerStore::new(tmp.path()).unwrap();
        let index = NameIndex::new(tmp.path());
        let id = add_layer(&store, "sha256:a");
        assert!(index.bind("  ", &id).is_err());
    }

    #[test]
    fn test_resolve_unbound() {
        let tmp = TempDir::new().unwrap();
        let index = NameIndex::new(tmp.path());
        let err = index.resolve("nope").unwrap_err();
        assert!(matches!(err, TemplateError::TemplateNotFound(_)));
    }

    #[test]
    fn test_two_names_on_one_layer() {
        let tmp = TempDir::new().unwrap();
        let store = LayerStore::new(tmp.path()).unwrap();
        let index = NameIndex::new(tmp.path());
        let id = add_layer(&store, "sha256:a");

        index.bind("one", &id).unwrap();
        index.bind("two", &id).unwrap();
        assert_eq!(index.list().unwrap().len(), 2);

        assert_eq!(index.unbind("one").unwrap(), id);
        assert_eq!(index.names_for(&id).unwrap(), vec!["two"]);
        assert!(store.layer_dir(&id).join(INDEX_FILE).exists());
    }

    #[test]
    fn test_unbind_removes_index_file() {
        let tmp = TempDir::new().unwrap();
        let store = LayerStore::new(tmp.path()).unwrap();
        let index = NameIndex::new(tmp.path());
        let id = add_layer(&store, "sha256:a");

        index.bind("fedora", &id).unwrap();
        assert_eq!(index.unbind("fedora").unwrap(), id);
        assert!(!store.layer_dir(&id).join(INDEX_FILE).exists());
        assert!(index.list().unwrap().is_empty());
        // The layer itself stays
        assert!(store.contains(&id));
    }

    #[test]
    fn test_unbind_unknown() {
        let tmp = TempDir::new().unwrap();
        let index = NameIndex::new(tmp.path());
        assert!(index.unbind("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn test_duplicate_binding_on_disk_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let store = LayerStore::new(tmp.path()).unwrap();
        let index = NameIndex::new(tmp.path());
        let a = add_layer(&store, "sha256:a");
        let b = add_layer(&store, "sha256:b");

        index.bind("fedora", &a).unwrap();
        std::fs::write(
            store.layer_dir(&b).join(INDEX_FILE),
            r#"{"names":["fedora"]}"#,
        )
        .unwrap();

        let err = index.list().unwrap_err();
        assert!(matches!(err, TemplateError::StoreCorrupt { .. }));
    }
}
