//! `sandbox-image gc` command.

use clap::Args;
use sandbox_image_store::TemplateStore;

#[derive(Args)]
pub struct GcArgs {
    /// Print the id of every removed layer
    #[arg(short, long)]
    pub verbose: bool,
}

pub async fn execute(
    args: GcArgs,
    store: &TemplateStore,
) -> Result<(), Box<dyn std::error::Error>> {
    let report = store.sweep()?;

    if args.verbose {
        for id in &report.removed {
            println!("Removed layer {id}");
        }
    }
    println!(
        "Removed {} unreferenced layers and {} stale directories",
        report.removed.len(),
        report.stale_dirs
    );
    Ok(())
}
