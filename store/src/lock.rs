//! Cross-process store lock.
//!
//! The store does no locking of its own. Whoever drives a sequence of store
//! operations (the CLI) holds a [`StoreLock`] for its whole duration so two
//! invocations never mutate the same template directory at once.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs4::FileExt;
use sandbox_image_core::error::{Result, TemplateError};

/// Lock file inside the template directory.
pub const LOCK_FILE: &str = ".lock";

/// Exclusive advisory lock on a template directory, released on drop.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Block until the lock on `template_dir` is acquired.
    pub fn acquire(template_dir: &Path) -> Result<Self> {
        let (file, path) = Self::open(template_dir)?;
        file.lock_exclusive()
            .map_err(|e| TemplateError::io(&path, e))?;
        tracing::debug!(path = %path.display(), "Acquired store lock");
        Ok(Self { file, path })
    }

    /// Acquire the lock if nobody else holds it.
    pub fn try_acquire(template_dir: &Path) -> Result<Option<Self>> {
        let (file, path) = Self::open(template_dir)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file, path })),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(TemplateError::io(&path, e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(template_dir: &Path) -> Result<(File, PathBuf)> {
        std::fs::create_dir_all(template_dir).map_err(|e| TemplateError::io(template_dir, e))?;
        let path = template_dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| TemplateError::io(&path, e))?;
        Ok((file, path))
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release store lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_creates_lock_file() {
        let tmp = TempDir::new().unwrap();
        let lock = StoreLock::acquire(tmp.path()).unwrap();
        assert!(lock.path().exists());
        assert_eq!(lock.path(), tmp.path().join(LOCK_FILE));
    }

    #[test]
    fn test_lock_is_exclusive() {
        let tmp = TempDir::new().unwrap();
        let held = StoreLock::acquire(tmp.path()).unwrap();
        assert!(StoreLock::try_acquire(tmp.path()).unwrap().is_none());

        drop(held);
        assert!(StoreLock::try_acquire(tmp.path()).unwrap().is_some());
    }
}
