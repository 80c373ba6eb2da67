//! CLI command definitions and dispatch.

mod create;
mod delete;
mod download;
mod gc;
mod list;
mod run;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use sandbox_image_core::StoreConfig;
use sandbox_image_store::{SourceRegistry, StoreLock, TemplateStore};

/// Sandbox Image - layered templates for sandboxed applications.
#[derive(Parser)]
#[command(name = "sandbox-image", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Options locating the template store.
#[derive(Args, Debug, Clone, Default)]
pub struct StoreArgs {
    /// YAML file with `template_dir` and optional `storage_dir`
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Template directory (storage moves along unless --storage-dir is given)
    #[arg(short = 't', long, global = true)]
    pub template_dir: Option<PathBuf>,

    /// Directory for materialized run artifacts
    #[arg(long, global = true)]
    pub storage_dir: Option<PathBuf>,
}

impl StoreArgs {
    /// Build the store configuration: file or detected defaults, then flags.
    pub fn store_config(&self) -> Result<StoreConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => StoreConfig::from_file(path)?,
            None => StoreConfig::detect(),
        };
        if let Some(dir) = &self.template_dir {
            config = StoreConfig::with_template_dir(dir);
        }
        if let Some(dir) = &self.storage_dir {
            config.storage_dir = dir.clone();
        }
        Ok(config)
    }

    /// Lock the template directory and open the store with the default sources.
    ///
    /// The lock must outlive every store operation of the command.
    pub fn open(&self) -> Result<(StoreLock, TemplateStore), Box<dyn std::error::Error>> {
        let config = self.store_config()?;
        let lock = StoreLock::acquire(&config.template_dir)?;
        let store = TemplateStore::open(config, SourceRegistry::with_defaults())?;
        Ok((lock, store))
    }
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Download a template from a source and bind it to a name
    Download(download::DownloadArgs),
    /// Delete a template and the layers no other template uses
    Delete(delete::DeleteArgs),
    /// Materialize a template as a disk artifact
    Create(create::CreateArgs),
    /// Prepare a template for launch and print the launch parameters
    Run(run::RunArgs),
    /// List templates
    List(list::ListArgs),
    /// Remove unreferenced layers and leftovers of interrupted runs
    Gc(gc::GcArgs),
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let (_lock, store) = cli.store.open()?;

    match cli.command {
        Command::Download(args) => download::execute(args, &store).await,
        Command::Delete(args) => delete::execute(args, &store).await,
        Command::Create(args) => create::execute(args, &store).await,
        Command::Run(args) => run::execute(args, &store).await,
        Command::List(args) => list::execute(args, &store).await,
        Command::Gc(args) => gc::execute(args, &store).await,
    }
}
