//! Layer identifiers.
//!
//! A `LayerId` names one layer directory in the store. Ids derived during
//! ingestion are chain ids: the hash of the parent's id and the layer's own
//! content digest, so identical content at the same position of two chains
//! maps to the same directory.

use std::fmt;

use sandbox_image_core::error::{Result, TemplateError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Opaque, validated layer identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LayerId(String);

impl LayerId {
    /// Wrap an existing identifier after validating it is usable as a directory name.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(TemplateError::ConfigError("Empty layer id".to_string()));
        }
        if id.starts_with('.') {
            return Err(TemplateError::ConfigError(format!(
                "Invalid layer id '{}': must not start with '.'",
                id
            )));
        }
        if let Some(c) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.')))
        {
            return Err(TemplateError::ConfigError(format!(
                "Invalid layer id '{}': unexpected character {:?}",
                id, c
            )));
        }
        Ok(Self(id))
    }

    /// Derive the id of a layer with content `digest` stacked on `parent`.
    pub fn chain(parent: Option<&LayerId>, digest: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(parent.map(|p| p.as_str()).unwrap_or("").as_bytes());
        hasher.update(b" ");
        hasher.update(digest.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters, for display.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for LayerId {
    type Error = TemplateError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<LayerId> for String {
    fn from(id: LayerId) -> Self {
        id.0
    }
}

impl std::str::FromStr for LayerId {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}
