//! Volume types for template and run configuration.
//!
//! A layer may declare guest paths that should be backed by a volume; a
//! caller may bind host directories onto guest paths at run time.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A volume attached to a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    /// Guest path the volume is mounted at (unique key when merging).
    pub target: String,

    /// Host directory backing the volume. `None` for volumes declared by a
    /// template layer; the launcher allocates their backing storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,

    /// Whether the guest sees the volume read-only.
    #[serde(default)]
    pub read_only: bool,
}

impl VolumeSpec {
    /// A volume declared by a template (guest path only).
    pub fn declared(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            source: None,
            read_only: false,
        }
    }

    /// Parse a caller bind mount: `host:guest`, `host:guest:ro` or `host:guest:rw`.
    pub fn parse(spec: &str) -> Result<Self, String> {
        let parts: Vec<&str> = spec.split(':').collect();
        let (host, guest, read_only) = match parts.as_slice() {
            [host, guest] => (*host, *guest, false),
            [host, guest, "ro"] => (*host, *guest, true),
            [host, guest, "rw"] => (*host, *guest, false),
            [_, _, mode] => {
                return Err(format!(
                    "Invalid volume mode '{mode}' in '{spec}' (expected ro or rw)"
                ))
            }
            _ => {
                return Err(format!(
                    "Invalid volume (expected host:guest[:ro|rw]): {spec}"
                ))
            }
        };

        if host.is_empty() || guest.is_empty() {
            return Err(format!("Invalid volume (empty path): {spec}"));
        }
        if !guest.starts_with('/') {
            return Err(format!("Volume target must be an absolute path: {guest}"));
        }

        Ok(Self {
            target: guest.to_string(),
            source: Some(PathBuf::from(host)),
            read_only,
        })
    }
}
