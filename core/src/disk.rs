//! Disk image formats understood by sandbox launchers.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Disk image format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskFormat {
    Raw,
    Dir,
    Bochs,
    Cloop,
    Cow,
    Dmg,
    Iso,
    Qcow,
    Qcow2,
    Qed,
    Vmdk,
    Vpc,
    Fat,
    Vhd,
}

impl DiskFormat {
    /// All formats, in their canonical order.
    pub const ALL: [DiskFormat; 14] = [
        Self::Raw,
        Self::Dir,
        Self::Bochs,
        Self::Cloop,
        Self::Cow,
        Self::Dmg,
        Self::Iso,
        Self::Qcow,
        Self::Qcow2,
        Self::Qed,
        Self::Vmdk,
        Self::Vpc,
        Self::Fat,
        Self::Vhd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Dir => "dir",
            Self::Bochs => "bochs",
            Self::Cloop => "cloop",
            Self::Cow => "cow",
            Self::Dmg => "dmg",
            Self::Iso => "iso",
            Self::Qcow => "qcow",
            Self::Qcow2 => "qcow2",
            Self::Qed => "qed",
            Self::Vmdk => "vmdk",
            Self::Vpc => "vpc",
            Self::Fat => "fat",
            Self::Vhd => "vhd",
        }
    }

    /// Guess the format from a file name.
    ///
    /// Everything after the first `.` of the file name is the extension;
    /// `img` means raw.
    pub fn guess_from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let (_, ext) = name.split_once('.')?;
        if ext == "img" {
            return Some(Self::Raw);
        }
        ext.parse().ok()
    }
}

impl Default for DiskFormat {
    fn default() -> Self {
        Self::Dir
    }
}

impl std::fmt::Display for DiskFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DiskFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| format!("unknown disk format: '{}'", s))
    }
}
