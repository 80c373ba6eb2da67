//! Store configuration.
//!
//! The two store roots are chosen once at startup and passed to the store
//! on construction.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TemplateError};

/// Template root used when the process may write to it.
pub const PRIVILEGED_TEMPLATE_DIR: &str = "/var/lib/libvirt/templates";

/// Template root below the user's data directory, relative to `$HOME`.
pub const UNPRIVILEGED_TEMPLATE_SUBDIR: &str = ".local/share/libvirt/templates";

/// Name of the storage directory below a template root.
pub const STORAGE_SUBDIR: &str = "storage";

/// Store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding one subdirectory per layer
    pub template_dir: PathBuf,

    /// Directory for materialized, caller-owned run artifacts
    pub storage_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::unprivileged()
    }
}

impl StoreConfig {
    /// Configuration rooted at `template_dir`, with storage below it.
    pub fn with_template_dir(template_dir: impl Into<PathBuf>) -> Self {
        let template_dir = template_dir.into();
        Self {
            storage_dir: template_dir.join(STORAGE_SUBDIR),
            template_dir,
        }
    }

    /// Per-user configuration under `~/.local/share/libvirt/templates`.
    pub fn unprivileged() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::with_template_dir(home.join(UNPRIVILEGED_TEMPLATE_SUBDIR))
    }

    /// Pick the system-wide root when it is writable, the per-user root otherwise.
    pub fn detect() -> Self {
        let privileged = Path::new(PRIVILEGED_TEMPLATE_DIR);
        if is_writable(privileged) {
            tracing::debug!(dir = %privileged.display(), "Using privileged template directory");
            Self::with_template_dir(privileged)
        } else {
            Self::unprivileged()
        }
    }

    /// Load configuration from a YAML file.
    ///
    /// A missing `storage_dir` defaults to `<template_dir>/storage`.
    pub fn from_file(path: &Path) -> Result<Self> {
        #[derive(Deserialize)]
        struct RawConfig {
            template_dir: PathBuf,
            storage_dir: Option<PathBuf>,
        }

        let content = std::fs::read_to_string(path).map_err(|e| TemplateError::io(path, e))?;
        let raw: RawConfig = serde_yaml::from_str(&content).map_err(|e| {
            TemplateError::ConfigError(format!(
                "Failed to parse store config {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut config = Self::with_template_dir(raw.template_dir);
        if let Some(storage_dir) = raw.storage_dir {
            config.storage_dir = storage_dir;
        }
        Ok(config)
    }

    /// Create both store roots if they do not exist.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.template_dir, &self.storage_dir] {
            std::fs::create_dir_all(dir).map_err(|e| TemplateError::io(dir, e))?;
        }
        Ok(())
    }
}

/// Check write access the way the kernel would for this process.
fn is_writable(path: &Path) -> bool {
    use std::os::unix::ffi::OsStrExt;

    let Ok(c_path) = std::ffi::CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call.
    unsafe { libc::access(c_path.as_ptr(), libc::W_OK) == 0 }
}
