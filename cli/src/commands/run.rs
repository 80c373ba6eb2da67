//! `sandbox-image run` command.
//!
//! Materializes the template and prints the launch parameters as JSON for a
//! sandbox launcher to consume.

use clap::Args;
use sandbox_image_core::{DiskFormat, EnvVar, VolumeSpec};
use sandbox_image_store::{RunOptions, TemplateStore};

#[derive(Args)]
pub struct RunArgs {
    /// Template to run
    pub name: String,

    /// Bind mount a volume (host:guest[:ro|:rw])
    #[arg(short = 'v', long = "volume", value_parser = VolumeSpec::parse)]
    pub volumes: Vec<VolumeSpec>,

    /// Set an environment variable (KEY=VALUE)
    #[arg(short = 'e', long = "env", value_parser = EnvVar::parse)]
    pub env: Vec<EnvVar>,

    /// Network parameter passed to the launcher as given
    #[arg(short, long)]
    pub network: Vec<String>,

    /// Disk format of the artifact
    #[arg(short, long, default_value = "dir")]
    pub format: DiskFormat,

    /// Command replacing the template's default
    #[arg(last = true)]
    pub command: Vec<String>,
}

impl RunArgs {
    fn options(self) -> RunOptions {
        RunOptions {
            volumes: self.volumes,
            env: self.env,
            network: self.network,
            command: if self.command.is_empty() {
                None
            } else {
                Some(self.command)
            },
            format: self.format,
        }
    }
}

pub async fn execute(
    args: RunArgs,
    store: &TemplateStore,
) -> Result<(), Box<dyn std::error::Error>> {
    let name = args.name.clone();
    let (spec, artifact) = store.run(&name, args.options())?;

    tracing::info!(name = %name, disk = %artifact.path().display(), "Prepared template for launch");
    println!("{}", serde_json::to_string_pretty(&spec)?);
    Ok(())
}
