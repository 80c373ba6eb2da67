//! Run artifact materialization.
//!
//! Builds a private root filesystem for one sandbox by unpacking every
//! layer payload of a chain, root first, into a fresh directory below the
//! storage directory. Stored layers are only read. OCI whiteouts
//! (`.wh.<name>` and `.wh..wh..opq`) hide content from lower layers.

use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use sandbox_image_core::error::{Result, TemplateError};
use sandbox_image_core::DiskFormat;
use tar::Archive;

use crate::layer::{Layer, PayloadFormat};

const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";
const BUILDING_PREFIX: &str = ".building-";

/// A materialized, caller-owned copy of a template.
#[derive(Debug)]
pub struct RunArtifact {
    path: PathBuf,
    format: DiskFormat,
}

impl RunArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> DiskFormat {
        self.format
    }

    /// Delete the artifact.
    pub fn discard(self) -> Result<()> {
        let result = if self.path.is_dir() {
            std::fs::remove_dir_all(&self.path)
        } else {
            std::fs::remove_file(&self.path)
        };
        match result {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(TemplateError::io(&self.path, e)),
        }
        tracing::debug!(path = %self.path.display(), "Discarded run artifact");
        Ok(())
    }
}

/// Creates run artifacts below a storage directory.
pub struct Materializer {
    storage_dir: PathBuf,
}

impl Materializer {
    pub fn new(storage_dir: &Path) -> Self {
        Self {
            storage_dir: storage_dir.to_path_buf(),
        }
    }

    /// Build an artifact of `format` from `chain` (root first).
    ///
    /// Only the `dir` format can be produced; image formats need an external
    /// disk tool.
    pub fn materialize(&self, chain: &[Layer], format: DiskFormat) -> Result<RunArtifact> {
        if format != DiskFormat::Dir {
            return Err(TemplateError::ConfigError(format!(
                "Cannot materialize {} disks, only {} is supported",
                format,
                DiskFormat::Dir
            )));
        }
        let top = chain
            .last()
            .ok_or_else(|| TemplateError::ConfigError("Empty layer chain".to_string()))?;

        std::fs::create_dir_all(&self.storage_dir)
            .map_err(|e| TemplateError::io(&self.storage_dir, e))?;

        let unique = uuid::Uuid::new_v4().simple().to_string();
        let building = self
            .storage_dir
            .join(format!("{}{}", BUILDING_PREFIX, unique));
        let target = self
            .storage_dir
            .join(format!("{}-{}", top.id().short(), &unique[..12]));

        std::fs::create_dir(&building).map_err(|e| TemplateError::io(&building, e))?;
        if let Err(e) = self.unpack_chain(chain, &building) {
            let _ = std::fs::remove_dir_all(&building);
            return Err(e);
        }
        if let Err(e) = std::fs::rename(&building, &target) {
            let _ = std::fs::remove_dir_all(&building);
            return Err(TemplateError::io(&target, e));
        }

        tracing::info!(
            top = %top.id(),
            path = %target.display(),
            layers = chain.len(),
            "Materialized template"
        );

        Ok(RunArtifact {
            path: target,
            format,
        })
    }

    /// Remove artifacts left half-built by interrupted runs.
    pub fn cleanup_stale(&self) -> Result<usize> {
        let read_dir = match std::fs::read_dir(&self.storage_dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(TemplateError::io(&self.storage_dir, e)),
        };

        let mut removed = 0;
        for entry in read_dir.flatten() {
            let is_building = entry
                .file_name()
                .to_str()
                .map_or(false, |n| n.starts_with(BUILDING_PREFIX));
            if !is_building {
                continue;
            }
            let path = entry.path();
            std::fs::remove_dir_all(&path).map_err(|e| TemplateError::io(&path, e))?;
            removed += 1;
        }
        Ok(removed)
    }

    fn unpack_chain(&self, chain: &[Layer], rootfs: &Path) -> Result<()> {
        for layer in chain {
            let (Some(payload), Some(path)) = (layer.meta.payload, layer.payload_path()) else {
                continue;
            };
            apply_whiteouts(&path, payload, rootfs).map_err(|e| {
                TemplateError::corrupt(layer.id().as_str(), format!("Unreadable payload: {}", e))
            })?;
            extract_layer(&path, payload, rootfs).map_err(|e| {
                TemplateError::corrupt(
                    layer.id().as_str(),
                    format!("Failed to extract payload: {}", e),
                )
            })?;
            tracing::debug!(id = %layer.id(), "Extracted layer");
        }
        Ok(())
    }
}

fn open_payload(path: &Path, format: PayloadFormat) -> std::io::Result<Archive<Box<dyn Read>>> {
    let file = File::open(path)?;
    let reader: Box<dyn Read> = match format {
        PayloadFormat::Tar => Box::new(file),
        PayloadFormat::TarGzip => Box::new(GzDecoder::new(file)),
    };
    Ok(Archive::new(reader))
}

/// Remove what this layer's whiteout entries hide in the layers below.
fn apply_whiteouts(path: &Path, format: PayloadFormat, rootfs: &Path) -> std::io::Result<()> {
    let mut archive = open_payload(path, format)?;

    for entry in archive.entries()? {
        let entry = entry?;
        let entry_path = entry.path()?.into_owned();
        let Some(file_name) = entry_path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !file_name.starts_with(WHITEOUT_PREFIX) {
            continue;
        }
        let parent = entry_path.parent().unwrap_or(Path::new(""));
        let Some(dir) = contained(rootfs, parent)? else {
            tracing::warn!(path = %entry_path.display(), "Skipping whiteout outside rootfs");
            continue;
        };

        if file_name == OPAQUE_WHITEOUT {
            if dir.is_dir() {
                for child in std::fs::read_dir(&dir)? {
                    remove_path(&child?.path())?;
                }
            }
        } else {
            remove_path(&dir.join(&file_name[WHITEOUT_PREFIX.len()..]))?;
        }
    }
    Ok(())
}

/// Unpack every non-whiteout entry of a payload into `rootfs`.
fn extract_layer(path: &Path, format: PayloadFormat, rootfs: &Path) -> std::io::Result<()> {
    let mut archive = open_payload(path, format)?;
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let is_whiteout = entry
            .path()?
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.starts_with(WHITEOUT_PREFIX));
        if is_whiteout {
            continue;
        }
        entry.unpack_in(rootfs)?;
    }
    Ok(())
}

/// `rootfs` joined with `relative`, if `relative` stays inside it.
///
/// Every existing component is checked with `symlink_metadata`: a symlink
/// planted by a lower layer could otherwise lead the path out of `rootfs`.
fn contained(rootfs: &Path, relative: &Path) -> std::io::Result<Option<PathBuf>> {
    let mut path = rootfs.to_path_buf();
    let mut exists = true;
    for component in relative.components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => continue,
            _ => return Ok(None),
        }
        if !exists {
            continue;
        }
        match std::fs::symlink_metadata(&path) {
            Ok(metadata) if metadata.file_type().is_symlink() => return Ok(None),
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => exists = false,
            Err(e) => return Err(e),
        }
    }
    Ok(Some(path))
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if metadata.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}
