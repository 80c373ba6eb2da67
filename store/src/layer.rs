//! Layer metadata types.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sandbox_image_core::EnvVar;
use serde::{Deserialize, Serialize};

use crate::id::LayerId;

/// Metadata file inside a layer directory.
pub const TEMPLATE_FILE: &str = "template.json";

/// Payload file inside a layer directory.
pub const DATA_FILE: &str = "data";

/// Name index file, present only on layers with bound template names.
pub const INDEX_FILE: &str = "index.json";

/// Archive format of a layer payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PayloadFormat {
    /// Uncompressed tar archive
    Tar,
    /// Gzip-compressed tar archive
    TarGzip,
}

impl PayloadFormat {
    /// Map an OCI or Docker layer media type to a payload format.
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        if media_type.ends_with("tar+gzip") || media_type.ends_with("tar.gzip") {
            Some(Self::TarGzip)
        } else if media_type.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }
}

/// Runtime configuration declared by a single layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerConfig {
    /// Environment variables
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    /// Guest paths that should be backed by volumes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,

    /// Entrypoint command
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entrypoint: Vec<String>,

    /// Default command arguments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cmd: Vec<String>,

    /// Working directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

impl LayerConfig {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Persistent description of one layer (`template.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerMeta {
    /// Layer id (equals the directory name)
    pub id: LayerId,
    /// Parent layer, `None` for a root layer
    pub parent: Option<LayerId>,
    /// Content digest reported by the source (e.g., "sha256:abc123...")
    pub digest: String,
    /// Payload archive format, `None` for a marker layer without payload
    pub payload: Option<PayloadFormat>,
    /// Payload size in bytes
    #[serde(default)]
    pub size_bytes: u64,
    /// Name of the source that created the layer
    pub source: String,
    /// When the layer was stored
    pub created_at: DateTime<Utc>,
    /// Per-layer runtime configuration
    #[serde(default)]
    pub config: LayerConfig,
}

impl LayerMeta {
    /// Whether `other` describes the same layer content.
    ///
    /// Creation time, size and source are bookkeeping and do not count.
    pub fn same_content(&self, other: &LayerMeta) -> bool {
        self.id == other.id
            && self.parent == other.parent
            && self.digest == other.digest
            && self.payload == other.payload
            && self.config == other.config
    }
}

/// A layer as read back from the store.
#[derive(Debug, Clone)]
pub struct Layer {
    pub meta: LayerMeta,
    /// Layer directory
    pub dir: PathBuf,
}

impl Layer {
    pub fn id(&self) -> &LayerId {
        &self.meta.id
    }

    pub fn parent(&self) -> Option<&LayerId> {
        self.meta.parent.as_ref()
    }

    pub fn config(&self) -> &LayerConfig {
        &self.meta.config
    }

    /// Path to the payload archive, if the layer has one.
    pub fn payload_path(&self) -> Option<PathBuf> {
        self.meta.payload.map(|_| self.dir.join(DATA_FILE))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
