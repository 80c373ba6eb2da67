use std::path::{Path, PathBuf};

use thiserror::Error;

/// Template store error types
#[derive(Error, Debug)]
pub enum TemplateError {
    /// No template is bound to this name
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    /// No layer with this id exists in the store
    #[error("Layer not found: {0}")]
    LayerNotFound(String),

    /// Template name is already bound
    #[error("Template already exists: {0}")]
    AlreadyExists(String),

    /// Source backend could not provide template content
    #[error("Source unavailable: {backend} - {message}")]
    SourceUnavailable { backend: String, message: String },

    /// Broken parent link, unreadable metadata, or a failed layer write
    #[error("Store corrupt: {id} - {message}")]
    StoreCorrupt { id: String, message: String },

    /// Filesystem access refused
    #[error("Permission denied: {}: {message}", path.display())]
    PermissionDenied { path: PathBuf, message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Coarse classification used by callers to pick a reaction (exit code, retry).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    SourceUnavailable,
    StoreCorrupt,
    PermissionDenied,
    Io,
    Serialization,
    Config,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotFound => "not-found",
            Self::AlreadyExists => "already-exists",
            Self::SourceUnavailable => "source-unavailable",
            Self::StoreCorrupt => "store-corrupt",
            Self::PermissionDenied => "permission-denied",
            Self::Io => "io",
            Self::Serialization => "serialization",
            Self::Config => "config",
        };
        f.write_str(s)
    }
}

impl TemplateError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TemplateNotFound(_) | Self::LayerNotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::SourceUnavailable { .. } => ErrorKind::SourceUnavailable,
            Self::StoreCorrupt { .. } => ErrorKind::StoreCorrupt,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::IoError(_) => ErrorKind::Io,
            Self::SerializationError(_) => ErrorKind::Serialization,
            Self::ConfigError(_) => ErrorKind::Config,
        }
    }

    /// True for both template and layer lookups that found nothing.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Convert a filesystem error on `path`, keeping permission problems distinct.
    pub fn io(path: &Path, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            Self::PermissionDenied {
                path: path.to_path_buf(),
                message: err.to_string(),
            }
        } else {
            Self::IoError(std::io::Error::new(
                err.kind(),
                format!("{}: {}", path.display(), err),
            ))
        }
    }

    /// Build a `StoreCorrupt` error for layer `id`.
    pub fn corrupt(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StoreCorrupt {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Build a `SourceUnavailable` error for source `backend`.
    pub fn source_unavailable(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            backend: backend.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for TemplateError {
    fn from(err: serde_json::Error) -> Self {
        TemplateError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for TemplateError {
    fn from(err: serde_yaml::Error) -> Self {
        TemplateError::SerializationError(err.to_string())
    }
}

/// Result type alias for template store operations
pub type Result<T> = std::result::Result<T, TemplateError>;
