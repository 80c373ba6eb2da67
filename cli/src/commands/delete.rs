//! `sandbox-image delete` command.

use clap::Args;
use sandbox_image_store::TemplateStore;

#[derive(Args)]
pub struct DeleteArgs {
    /// Template to delete
    pub name: String,
}

pub async fn execute(
    args: DeleteArgs,
    store: &TemplateStore,
) -> Result<(), Box<dyn std::error::Error>> {
    let removed = store.delete(&args.name)?;

    if removed.is_empty() {
        println!("Deleted {} (layers still in use)", args.name);
    } else {
        println!("Deleted {} ({} layers removed)", args.name, removed.len());
    }
    Ok(())
}
