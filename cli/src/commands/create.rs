//! `sandbox-image create` command.

use std::path::PathBuf;

use clap::Args;
use sandbox_image_core::{DiskFormat, TemplateError};
use sandbox_image_store::TemplateStore;

#[derive(Args)]
pub struct CreateArgs {
    /// Template to materialize
    pub name: String,

    /// Disk format of the artifact (guessed from --output, else dir)
    #[arg(short, long)]
    pub format: Option<DiskFormat>,

    /// Move the artifact to this path instead of leaving it in the storage dir
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl CreateArgs {
    fn format(&self) -> DiskFormat {
        self.format
            .or_else(|| self.output.as_deref().and_then(DiskFormat::guess_from_path))
            .unwrap_or_default()
    }
}

/// Prints the artifact path. The artifact is left for the caller to remove.
pub async fn execute(
    args: CreateArgs,
    store: &TemplateStore,
) -> Result<(), Box<dyn std::error::Error>> {
    let artifact = store.create(&args.name, args.format())?;

    let path = match &args.output {
        Some(output) => {
            if let Err(e) = std::fs::rename(artifact.path(), output) {
                let err = TemplateError::io(output, e);
                artifact.discard()?;
                return Err(err.into());
            }
            output.clone()
        }
        None => artifact.path().to_path_buf(),
    };

    println!("{}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(format: Option<DiskFormat>, output: Option<&str>) -> CreateArgs {
        CreateArgs {
            name: "web".to_string(),
            format,
            output: output.map(PathBuf::from),
        }
    }

    #[test]
    fn test_format_defaults_to_dir() {
        assert_eq!(args(None, None).format(), DiskFormat::Dir);
        assert_eq!(args(None, Some("/srv/web")).format(), DiskFormat::Dir);
    }

    #[test]
    fn test_format_guessed_from_output() {
        assert_eq!(args(None, Some("/srv/web.qcow2")).format(), DiskFormat::Qcow2);
        assert_eq!(args(None, Some("web.img")).format(), DiskFormat::Raw);
    }

    #[test]
    fn test_explicit_format_wins() {
        assert_eq!(
            args(Some(DiskFormat::Dir), Some("web.qcow2")).format(),
            DiskFormat::Dir
        );
    }
}
